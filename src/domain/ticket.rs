//! Orders and the pending (waitlist) queue (SPEC_FULL.md §1, course-project origin
//! `management/ticket.{h,cpp}`).
//!
//! `order_db` is keyed by `(user_hash, seq)` and is the showcase for the degraded
//! comparator: `query_order` asks for every order belonging to a user via
//! [`BPlusTree::get_all_value`], which only needs `user_hash` to agree — exactly the
//! "equal-prefix range scan" the B+ tree index exists to support. `pending_db` uses
//! the same trick keyed by `(train_hash, date, seq)`, grouped by `(train_hash,
//! date)`, so a refund can find every waitlisted order for the seats it just freed.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::encoding::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, FixedStr};
use crate::domain::train::TrainTable;
use crate::storage::index::node::{IndexKey, IndexValue};
use crate::storage::index::{BPlusTree, KeyComparator};
use std::cmp::Ordering as CmpOrdering;

const TRAIN_ID_LEN: usize = 20;
const STATION_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum OrderStatus {
    Success = 0,
    Pending = 1,
    Refunded = 2,
}

impl OrderStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => OrderStatus::Success,
            1 => OrderStatus::Pending,
            _ => OrderStatus::Refunded,
        }
    }
}

/// `(user_hash, seq)`: unique per order, ordered by creation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OrderKey {
    pub user_hash: u64,
    pub seq: u64,
}

impl IndexKey for OrderKey {
    const ENCODED_SIZE: usize = 16;
    fn encode(&self, out: &mut [u8]) {
        write_u64(out, 0, self.user_hash);
        write_u64(out, 8, self.seq);
    }
    fn decode(bytes: &[u8]) -> Self {
        Self { user_hash: read_u64(bytes, 0), seq: read_u64(bytes, 8) }
    }
}

#[derive(Clone, Copy, Default)]
pub struct OrderKeyComparator;
impl KeyComparator<OrderKey> for OrderKeyComparator {
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> CmpOrdering {
        (a.user_hash, a.seq).cmp(&(b.user_hash, b.seq))
    }
}

#[derive(Clone, Copy, Default)]
pub struct OrderKeyByUser;
impl KeyComparator<OrderKey> for OrderKeyByUser {
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> CmpOrdering {
        a.user_hash.cmp(&b.user_hash)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OrderRecord {
    pub status: u8,
    /// Duplicates the owning key's `seq`; kept on the value too so a degraded scan
    /// over `order_db` (which only yields values) can still recover which order it
    /// is looking at without a second lookup.
    pub seq: u64,
    pub train_hash: u64,
    pub train_id: FixedStr<TRAIN_ID_LEN>,
    pub from: FixedStr<STATION_LEN>,
    pub to: FixedStr<STATION_LEN>,
    pub date: u16,
    pub from_index: u8,
    pub to_index: u8,
    pub price: u32,
    pub num: u16,
}

impl OrderRecord {
    pub fn status(&self) -> OrderStatus {
        OrderStatus::from_u8(self.status)
    }
}

impl IndexValue for OrderRecord {
    const ENCODED_SIZE: usize = 1 + 8 + 8 + TRAIN_ID_LEN + STATION_LEN * 2 + 2 + 1 + 1 + 4 + 2;

    fn encode(&self, out: &mut [u8]) {
        let mut off = 0;
        out[off] = self.status;
        off += 1;
        write_u64(out, off, self.seq);
        off += 8;
        write_u64(out, off, self.train_hash);
        off += 8;
        self.train_id.encode(&mut out[off..off + TRAIN_ID_LEN]);
        off += TRAIN_ID_LEN;
        self.from.encode(&mut out[off..off + STATION_LEN]);
        off += STATION_LEN;
        self.to.encode(&mut out[off..off + STATION_LEN]);
        off += STATION_LEN;
        write_u16(out, off, self.date);
        off += 2;
        out[off] = self.from_index;
        off += 1;
        out[off] = self.to_index;
        off += 1;
        write_u32(out, off, self.price);
        off += 4;
        write_u16(out, off, self.num);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut off = 0;
        let status = bytes[off];
        off += 1;
        let seq = read_u64(bytes, off);
        off += 8;
        let train_hash = read_u64(bytes, off);
        off += 8;
        let train_id = FixedStr::decode(&bytes[off..off + TRAIN_ID_LEN]);
        off += TRAIN_ID_LEN;
        let from = FixedStr::decode(&bytes[off..off + STATION_LEN]);
        off += STATION_LEN;
        let to = FixedStr::decode(&bytes[off..off + STATION_LEN]);
        off += STATION_LEN;
        let date = read_u16(bytes, off);
        off += 2;
        let from_index = bytes[off];
        off += 1;
        let to_index = bytes[off];
        off += 1;
        let price = read_u32(bytes, off);
        off += 4;
        let num = read_u16(bytes, off);
        Self { status, seq, train_hash, train_id, from, to, date, from_index, to_index, price, num }
    }
}

/// `(train_hash, date, seq)`: unique per waitlisted order, grouped by `(train_hash,
/// date)` for the degraded comparator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PendingKey {
    pub train_hash: u64,
    pub date: u16,
    pub seq: u64,
}

impl IndexKey for PendingKey {
    const ENCODED_SIZE: usize = 8 + 2 + 8;
    fn encode(&self, out: &mut [u8]) {
        write_u64(out, 0, self.train_hash);
        write_u16(out, 8, self.date);
        write_u64(out, 10, self.seq);
    }
    fn decode(bytes: &[u8]) -> Self {
        Self {
            train_hash: read_u64(bytes, 0),
            date: read_u16(bytes, 8),
            seq: read_u64(bytes, 10),
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct PendingKeyComparator;
impl KeyComparator<PendingKey> for PendingKeyComparator {
    fn compare(&self, a: &PendingKey, b: &PendingKey) -> CmpOrdering {
        (a.train_hash, a.date, a.seq).cmp(&(b.train_hash, b.date, b.seq))
    }
}

#[derive(Clone, Copy, Default)]
pub struct PendingKeyByTrainDate;
impl KeyComparator<PendingKey> for PendingKeyByTrainDate {
    fn compare(&self, a: &PendingKey, b: &PendingKey) -> CmpOrdering {
        (a.train_hash, a.date).cmp(&(b.train_hash, b.date))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PendingRecord {
    pub order_user_hash: u64,
    pub order_seq: u64,
    pub from_index: u8,
    pub to_index: u8,
    pub num: u16,
}

impl IndexValue for PendingRecord {
    const ENCODED_SIZE: usize = 8 + 8 + 1 + 1 + 2;
    fn encode(&self, out: &mut [u8]) {
        write_u64(out, 0, self.order_user_hash);
        write_u64(out, 8, self.order_seq);
        out[16] = self.from_index;
        out[17] = self.to_index;
        write_u16(out, 18, self.num);
    }
    fn decode(bytes: &[u8]) -> Self {
        Self {
            order_user_hash: read_u64(bytes, 0),
            order_seq: read_u64(bytes, 8),
            from_index: bytes[16],
            to_index: bytes[17],
            num: read_u16(bytes, 18),
        }
    }
}

type OrderTree = BPlusTree<OrderKey, OrderRecord, OrderKeyComparator, OrderKeyByUser>;
type PendingTree = BPlusTree<PendingKey, PendingRecord, PendingKeyComparator, PendingKeyByTrainDate>;

/// Result of a successful `buy_ticket`: either seats were granted outright, or (when
/// the caller opted in with `-q`) the order was queued.
pub enum PurchaseOutcome {
    Bought { price: u32 },
    Queued,
}

pub struct TicketBook {
    orders: OrderTree,
    pending: PendingTree,
    next_seq: AtomicU64,
}

impl TicketBook {
    pub fn open(dir: &Path) -> Self {
        Self {
            orders: crate::domain::table::open_tree(dir, "order", OrderKeyComparator, OrderKeyByUser),
            pending: crate::domain::table::open_tree(dir, "pending", PendingKeyComparator, PendingKeyByTrainDate),
            next_seq: AtomicU64::new(0),
        }
    }

    fn alloc_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn buy(
        &self,
        trains: &TrainTable,
        user_hash: u64,
        train_hash: u64,
        train_id: &str,
        date: u16,
        from: &str,
        to: &str,
        num: u16,
        allow_queue: bool,
    ) -> Result<PurchaseOutcome, ()> {
        let Some(train) = trains.get(train_hash) else {
            return Err(());
        };
        if date < train.sale_start_day || date > train.sale_end_day {
            return Err(());
        }
        let (Some(from_index), Some(to_index)) = (train.station_index(from), train.station_index(to)) else {
            return Err(());
        };
        if from_index >= to_index {
            return Err(());
        }
        if num == 0 || num > train.seat_capacity {
            return Err(());
        }

        let seq = self.alloc_seq();
        let key = OrderKey { user_hash, seq };
        let available = trains.min_seats_remaining(&train, train_hash, date, from_index as u8, to_index as u8);

        if available >= num {
            trains.sell(train_hash, date, from_index as u8, to_index as u8, num);
            let price = train.leg_price(from_index, to_index) * num as u32;
            let record = OrderRecord {
                status: OrderStatus::Success as u8,
                seq,
                train_hash,
                train_id: FixedStr::new(train_id),
                from: FixedStr::new(from),
                to: FixedStr::new(to),
                date,
                from_index: from_index as u8,
                to_index: to_index as u8,
                price,
                num,
            };
            self.orders.insert(key, record);
            return Ok(PurchaseOutcome::Bought { price });
        }

        if !allow_queue {
            return Err(());
        }

        let record = OrderRecord {
            status: OrderStatus::Pending as u8,
            seq,
            train_hash,
            train_id: FixedStr::new(train_id),
            from: FixedStr::new(from),
            to: FixedStr::new(to),
            date,
            from_index: from_index as u8,
            to_index: to_index as u8,
            price: 0,
            num,
        };
        self.orders.insert(key, record);
        self.pending.insert(
            PendingKey { train_hash, date, seq },
            PendingRecord { order_user_hash: user_hash, order_seq: seq, from_index: from_index as u8, to_index: to_index as u8, num },
        );
        Ok(PurchaseOutcome::Queued)
    }

    /// Every order for `user_hash`, most recent first (matching the CLI's natural
    /// "latest order is #1" indexing for `refund_ticket`).
    pub fn orders_for_user(&self, user_hash: u64) -> Vec<OrderRecord> {
        let probe = OrderKey { user_hash, seq: 0 };
        let mut orders = self.orders.get_all_value(&probe);
        orders.sort_by_key(|o| o.seq);
        orders.reverse();
        orders
    }

    /// Refunds the `n`-th most recent order for `user_hash` (1-indexed). On success,
    /// releases the seats it held and attempts to fulfil the pending queue for the
    /// same train/date with them.
    pub fn refund(&self, trains: &TrainTable, user_hash: u64, n: usize) -> Result<(), ()> {
        if n == 0 {
            return Err(());
        }
        let orders = self.orders_for_user(user_hash);
        let Some(record) = orders.get(n - 1) else {
            return Err(());
        };
        let key = OrderKey { user_hash, seq: record.seq };

        match record.status() {
            OrderStatus::Refunded => return Err(()),
            OrderStatus::Pending => {
                self.pending.remove(&PendingKey { train_hash: record.train_hash, date: record.date, seq: record.seq });
                let mut refunded = *record;
                refunded.status = OrderStatus::Refunded as u8;
                self.orders.remove(&key);
                self.orders.insert(key, refunded);
                return Ok(());
            }
            OrderStatus::Success => {}
        }

        trains.release(record.train_hash, record.date, record.from_index, record.to_index, record.num);
        let mut refunded = *record;
        refunded.status = OrderStatus::Refunded as u8;
        self.orders.remove(&key);
        self.orders.insert(key, refunded);

        self.fulfill_pending(trains, record.train_hash, record.date);
        Ok(())
    }

    /// Walks the pending queue for `(train_hash, date)` in FIFO order, granting
    /// seats to every order that now fits until none do.
    fn fulfill_pending(&self, trains: &TrainTable, train_hash: u64, date: u16) {
        let Some(train) = trains.get(train_hash) else { return };
        let probe = PendingKey { train_hash, date, seq: 0 };
        let mut waiting = self.pending.get_all_value(&probe);
        waiting.sort_by_key(|p| p.order_seq);

        for pending in waiting {
            let available = trains.min_seats_remaining(
                &train,
                train_hash,
                date,
                pending.from_index,
                pending.to_index,
            );
            if available < pending.num {
                continue;
            }
            trains.sell(train_hash, date, pending.from_index, pending.to_index, pending.num);
            self.pending.remove(&PendingKey { train_hash, date, seq: pending.order_seq });

            let order_key = OrderKey { user_hash: pending.order_user_hash, seq: pending.order_seq };
            if let Some(mut order) = self.orders.get_value(&order_key) {
                order.status = OrderStatus::Success as u8;
                order.price = train.leg_price(pending.from_index as usize, pending.to_index as usize) * order.num as u32;
                self.orders.remove(&order_key);
                self.orders.insert(order_key, order);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::train::{TrainRecord, MAX_SEGMENTS, MAX_STATIONS};
    use tempfile::tempdir;

    fn sample_train() -> TrainRecord {
        let mut stations = [FixedStr::<16>::default(); MAX_STATIONS];
        stations[0] = FixedStr::new("A");
        stations[1] = FixedStr::new("B");
        stations[2] = FixedStr::new("C");
        let mut prices = [0u16; MAX_SEGMENTS];
        prices[0] = 10;
        prices[1] = 20;
        TrainRecord {
            train_id: FixedStr::new("G1"),
            station_count: 3,
            stations,
            seat_capacity: 1,
            prices,
            start_time_minutes: 480,
            travel_minutes: [60, 90, 0, 0, 0, 0, 0],
            stopover_minutes: [0; MAX_SEGMENTS - 1],
            sale_start_day: 100,
            sale_end_day: 200,
            train_type: b'G',
        }
    }

    #[test]
    fn buy_then_refund_round_trips_seats() {
        let dir = tempdir().unwrap();
        let trains = TrainTable::open(dir.path());
        let book = TicketBook::open(dir.path());
        let train = sample_train();
        trains.add_train(train, 7).unwrap();

        let outcome = book.buy(&trains, 1, 7, "G1", 110, "A", "C", 1, false).unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Bought { price: 30 }));
        assert_eq!(trains.min_seats_remaining(&train, 7, 110, 0, 2), 0);

        book.refund(&trains, 1, 1).unwrap();
        assert_eq!(trains.min_seats_remaining(&train, 7, 110, 0, 2), 1);
    }

    #[test]
    fn second_buyer_queues_then_is_fulfilled_on_refund() {
        let dir = tempdir().unwrap();
        let trains = TrainTable::open(dir.path());
        let book = TicketBook::open(dir.path());
        let train = sample_train();
        trains.add_train(train, 7).unwrap();

        book.buy(&trains, 1, 7, "G1", 110, "A", "C", 1, false).unwrap();
        let queued = book.buy(&trains, 2, 7, "G1", 110, "A", "C", 1, true).unwrap();
        assert!(matches!(queued, PurchaseOutcome::Queued));

        book.refund(&trains, 1, 1).unwrap();

        let orders = book.orders_for_user(2);
        assert_eq!(orders[0].status(), OrderStatus::Success);
    }

    #[test]
    fn refund_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let trains = TrainTable::open(dir.path());
        let book = TicketBook::open(dir.path());
        let train = sample_train();
        trains.add_train(train, 7).unwrap();
        book.buy(&trains, 1, 7, "G1", 110, "A", "C", 1, false).unwrap();
        book.refund(&trains, 1, 1).unwrap();
        assert!(book.refund(&trains, 1, 1).is_err());
    }
}
