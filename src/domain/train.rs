//! The train catalogue and its per-(train, date, segment) seat inventory
//! (SPEC_FULL.md §1, course-project origin `management/train.{h,cpp}`).
//!
//! A train's static timetable (stations, prices, travel times) lives in one record
//! per train, keyed by a hash of its id. Seat counts are intentionally *not*
//! pre-materialised for every future date: a `(train, date, segment)` triple is only
//! written once a sale changes it, and an absent entry reads back as the train's full
//! `seat_capacity` — sparse storage over the same dense conceptual grid the
//! course-project origin keeps as one array per train.

use std::path::Path;

use crate::domain::encoding::{read_u16, read_u64, write_u16, write_u64, FixedStr};
use crate::domain::table::open_tree;
use crate::storage::index::node::{IndexKey, IndexValue};
use crate::storage::index::{BPlusTree, NaturalOrdComparator};

pub const MAX_STATIONS: usize = 8;
pub const MAX_SEGMENTS: usize = MAX_STATIONS - 1;
const STATION_NAME_LEN: usize = 16;
const TRAIN_ID_LEN: usize = 20;

#[derive(Clone, Copy, Debug)]
pub struct TrainRecord {
    pub train_id: FixedStr<TRAIN_ID_LEN>,
    pub station_count: u8,
    pub stations: [FixedStr<STATION_NAME_LEN>; MAX_STATIONS],
    pub seat_capacity: u16,
    /// `prices[i]` is the fare for the leg `stations[i] -> stations[i+1]`.
    pub prices: [u16; MAX_SEGMENTS],
    pub start_time_minutes: u16,
    pub travel_minutes: [u16; MAX_SEGMENTS],
    pub stopover_minutes: [u16; MAX_SEGMENTS - 1],
    /// Inclusive range of departure dates this train sells for, encoded the same
    /// way as [`super::dispatcher::parse_date`] (`month * 31 + day`).
    pub sale_start_day: u16,
    pub sale_end_day: u16,
    pub train_type: u8,
}

impl TrainRecord {
    pub fn station_index(&self, name: &str) -> Option<usize> {
        (0..self.station_count as usize).find(|&i| self.stations[i].as_str() == name)
    }

    pub fn leg_price(&self, from: usize, to: usize) -> u32 {
        self.prices[from..to].iter().map(|&p| p as u32).sum()
    }

    pub fn leg_minutes(&self, from: usize, to: usize) -> u32 {
        let travel: u32 = self.travel_minutes[from..to].iter().map(|&m| m as u32).sum();
        let stopovers: u32 = if to > from + 1 {
            self.stopover_minutes[from..to - 1].iter().map(|&m| m as u32).sum()
        } else {
            0
        };
        travel + stopovers
    }
}

impl IndexValue for TrainRecord {
    const ENCODED_SIZE: usize = TRAIN_ID_LEN
        + 1
        + STATION_NAME_LEN * MAX_STATIONS
        + 2
        + 2 * MAX_SEGMENTS
        + 2
        + 2 * MAX_SEGMENTS
        + 2 * (MAX_SEGMENTS - 1)
        + 2
        + 2
        + 1;

    fn encode(&self, out: &mut [u8]) {
        let mut off = 0;
        self.train_id.encode(&mut out[off..off + TRAIN_ID_LEN]);
        off += TRAIN_ID_LEN;
        out[off] = self.station_count;
        off += 1;
        for s in &self.stations {
            s.encode(&mut out[off..off + STATION_NAME_LEN]);
            off += STATION_NAME_LEN;
        }
        write_u16(out, off, self.seat_capacity);
        off += 2;
        for p in &self.prices {
            write_u16(out, off, *p);
            off += 2;
        }
        write_u16(out, off, self.start_time_minutes);
        off += 2;
        for t in &self.travel_minutes {
            write_u16(out, off, *t);
            off += 2;
        }
        for s in &self.stopover_minutes {
            write_u16(out, off, *s);
            off += 2;
        }
        write_u16(out, off, self.sale_start_day);
        off += 2;
        write_u16(out, off, self.sale_end_day);
        off += 2;
        out[off] = self.train_type;
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut off = 0;
        let train_id = FixedStr::decode(&bytes[off..off + TRAIN_ID_LEN]);
        off += TRAIN_ID_LEN;
        let station_count = bytes[off];
        off += 1;
        let mut stations = [FixedStr::<STATION_NAME_LEN>::default(); MAX_STATIONS];
        for s in stations.iter_mut() {
            *s = FixedStr::decode(&bytes[off..off + STATION_NAME_LEN]);
            off += STATION_NAME_LEN;
        }
        let seat_capacity = read_u16(bytes, off);
        off += 2;
        let mut prices = [0u16; MAX_SEGMENTS];
        for p in prices.iter_mut() {
            *p = read_u16(bytes, off);
            off += 2;
        }
        let start_time_minutes = read_u16(bytes, off);
        off += 2;
        let mut travel_minutes = [0u16; MAX_SEGMENTS];
        for t in travel_minutes.iter_mut() {
            *t = read_u16(bytes, off);
            off += 2;
        }
        let mut stopover_minutes = [0u16; MAX_SEGMENTS - 1];
        for s in stopover_minutes.iter_mut() {
            *s = read_u16(bytes, off);
            off += 2;
        }
        let sale_start_day = read_u16(bytes, off);
        off += 2;
        let sale_end_day = read_u16(bytes, off);
        off += 2;
        let train_type = bytes[off];
        Self {
            train_id,
            station_count,
            stations,
            seat_capacity,
            prices,
            start_time_minutes,
            travel_minutes,
            stopover_minutes,
            sale_start_day,
            sale_end_day,
            train_type,
        }
    }
}

/// `(train_hash, date, segment)`, unique per leg-per-day. Plain `Ord` on the tuple
/// is both the total order and the degraded comparator here: this table is looked up
/// one segment at a time (no prefix scan), unlike the order/pending tables.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SeatKey {
    pub train_hash: u64,
    pub date: u16,
    pub segment: u8,
}

impl IndexKey for SeatKey {
    const ENCODED_SIZE: usize = 8 + 2 + 1;
    fn encode(&self, out: &mut [u8]) {
        write_u64(out, 0, self.train_hash);
        write_u16(out, 8, self.date);
        out[10] = self.segment;
    }
    fn decode(bytes: &[u8]) -> Self {
        Self {
            train_hash: read_u64(bytes, 0),
            date: read_u16(bytes, 8),
            segment: bytes[10],
        }
    }
}

impl IndexValue for u16 {
    const ENCODED_SIZE: usize = 2;
    fn encode(&self, out: &mut [u8]) {
        write_u16(out, 0, *self);
    }
    fn decode(bytes: &[u8]) -> Self {
        read_u16(bytes, 0)
    }
}

type TrainTree = BPlusTree<u64, TrainRecord, NaturalOrdComparator<u64>, NaturalOrdComparator<u64>>;
type SeatTree = BPlusTree<SeatKey, u16, NaturalOrdComparator<SeatKey>, NaturalOrdComparator<SeatKey>>;

pub struct TrainTable {
    trains: TrainTree,
    seats: SeatTree,
}

impl TrainTable {
    pub fn open(dir: &Path) -> Self {
        Self {
            trains: open_tree(dir, "train", NaturalOrdComparator::new(), NaturalOrdComparator::new()),
            seats: open_tree(dir, "seat", NaturalOrdComparator::new(), NaturalOrdComparator::new()),
        }
    }

    pub fn add_train(&self, record: TrainRecord, train_hash: u64) -> Result<(), ()> {
        if self.trains.insert(train_hash, record) { Ok(()) } else { Err(()) }
    }

    pub fn get(&self, train_hash: u64) -> Option<TrainRecord> {
        self.trains.get_value(&train_hash)
    }

    /// Seats remaining on `segment` for `date`; absent entries mean "never sold",
    /// i.e. the train's full capacity.
    pub fn seats_remaining(&self, train: &TrainRecord, train_hash: u64, date: u16, segment: u8) -> u16 {
        let sold = self
            .seats
            .get_value(&SeatKey { train_hash, date, segment })
            .unwrap_or(0);
        train.seat_capacity.saturating_sub(sold)
    }

    /// Minimum seats remaining across every segment in `[from, to)`.
    pub fn min_seats_remaining(&self, train: &TrainRecord, train_hash: u64, date: u16, from: u8, to: u8) -> u16 {
        (from..to)
            .map(|seg| self.seats_remaining(train, train_hash, date, seg))
            .min()
            .unwrap_or(train.seat_capacity)
    }

    /// Records `num` additional seats sold on every segment in `[from, to)`.
    pub fn sell(&self, train_hash: u64, date: u16, from: u8, to: u8, num: u16) {
        for segment in from..to {
            let key = SeatKey { train_hash, date, segment };
            let sold = self.seats.get_value(&key).unwrap_or(0);
            self.seats.remove(&key);
            self.seats.insert(key, sold + num);
        }
    }

    /// Releases `num` previously-sold seats (a refund) on every segment in
    /// `[from, to)`.
    pub fn release(&self, train_hash: u64, date: u16, from: u8, to: u8, num: u16) {
        for segment in from..to {
            let key = SeatKey { train_hash, date, segment };
            let sold = self.seats.get_value(&key).unwrap_or(0);
            self.seats.remove(&key);
            self.seats.insert(key, sold.saturating_sub(num));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_train() -> TrainRecord {
        let mut stations = [FixedStr::<STATION_NAME_LEN>::default(); MAX_STATIONS];
        stations[0] = FixedStr::new("A");
        stations[1] = FixedStr::new("B");
        stations[2] = FixedStr::new("C");
        let mut prices = [0u16; MAX_SEGMENTS];
        prices[0] = 10;
        prices[1] = 20;
        let mut travel = [0u16; MAX_SEGMENTS];
        travel[0] = 60;
        travel[1] = 90;
        TrainRecord {
            train_id: FixedStr::new("G1"),
            station_count: 3,
            stations,
            seat_capacity: 2,
            prices,
            start_time_minutes: 480,
            travel_minutes: travel,
            stopover_minutes: [0; MAX_SEGMENTS - 1],
            sale_start_day: 101,
            sale_end_day: 131,
            train_type: b'G',
        }
    }

    #[test]
    fn train_record_round_trips_through_encode_decode() {
        let train = sample_train();
        let mut buf = vec![0u8; TrainRecord::ENCODED_SIZE];
        train.encode(&mut buf);
        let back = TrainRecord::decode(&buf);
        assert_eq!(back.train_id.as_str(), "G1");
        assert_eq!(back.stations[1].as_str(), "B");
        assert_eq!(back.prices[1], 20);
        assert_eq!(back.leg_price(0, 2), 30);
    }

    #[test]
    fn add_train_rejects_duplicate_id() {
        let dir = tempdir().unwrap();
        let table = TrainTable::open(dir.path());
        let train = sample_train();
        assert!(table.add_train(train, 42).is_ok());
        assert!(table.add_train(train, 42).is_err());
    }

    #[test]
    fn selling_and_releasing_seats_tracks_remaining_capacity() {
        let dir = tempdir().unwrap();
        let table = TrainTable::open(dir.path());
        let train = sample_train();
        table.add_train(train, 42).unwrap();

        assert_eq!(table.min_seats_remaining(&train, 42, 110, 0, 2), 2);
        table.sell(42, 110, 0, 2, 2);
        assert_eq!(table.min_seats_remaining(&train, 42, 110, 0, 2), 0);
        table.release(42, 110, 0, 2, 2);
        assert_eq!(table.min_seats_remaining(&train, 42, 110, 0, 2), 2);
    }

    #[test]
    fn seats_are_independent_per_date() {
        let dir = tempdir().unwrap();
        let table = TrainTable::open(dir.path());
        let train = sample_train();
        table.add_train(train, 42).unwrap();
        table.sell(42, 110, 0, 1, 2);
        assert_eq!(table.seats_remaining(&train, 42, 110, 0), 0);
        assert_eq!(table.seats_remaining(&train, 42, 111, 0), 2);
    }
}
