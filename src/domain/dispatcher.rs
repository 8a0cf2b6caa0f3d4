//! The line-oriented CLI grammar (SPEC_FULL.md §1): `[<timestamp>] <cmd> -<flag>
//! <value> ...`, dispatched to the user/train/ticket tables and echoed back with the
//! same bracketed timestamp, matching `management/management.cpp`'s `ProcessLine`.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::encoding::hash64;
use crate::domain::ticket::{OrderStatus, PurchaseOutcome, TicketBook};
use crate::domain::train::{TrainRecord, TrainTable, MAX_SEGMENTS, MAX_STATIONS};
use crate::domain::user::{ProfilePatch, UserTable};

pub struct Dispatcher {
    dir: std::path::PathBuf,
    users: UserTable,
    trains: TrainTable,
    tickets: TicketBook,
}

impl Dispatcher {
    pub fn open(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).expect("data directory must be creatable");
        Self {
            dir: dir.to_path_buf(),
            users: UserTable::open(dir),
            trains: TrainTable::open(dir),
            tickets: TicketBook::open(dir),
        }
    }

    /// Processes one line, returning its output (without the leading timestamp) and
    /// whether the dispatcher should keep reading further lines.
    pub fn dispatch(&mut self, line: &str) -> (String, bool) {
        let Some((timestamp, rest)) = split_timestamp(line) else {
            return (String::new(), true);
        };
        let mut tokens = rest.split_whitespace();
        let Some(cmd) = tokens.next() else {
            return (String::new(), true);
        };
        let flags = parse_flags(tokens);

        if cmd == "exit" {
            return (format!("{timestamp} bye"), false);
        }
        if cmd == "clean" {
            self.reset();
            return (format!("{timestamp} 0"), true);
        }

        let body = self.run(cmd, &flags);
        (format!("{timestamp} {body}"), true)
    }

    /// `clean` truncates every table file and starts the database fresh
    /// (SPEC_FULL.md §6): reopening the same directory without first removing its
    /// files would just resume the prior state, since the disk manager opens with
    /// `truncate(false)`.
    fn reset(&mut self) {
        std::fs::remove_dir_all(&self.dir).expect("data directory must be removable");
        *self = Dispatcher::open(&self.dir);
    }

    fn run(&mut self, cmd: &str, flags: &HashMap<char, String>) -> String {
        match cmd {
            "add_user" => self.add_user(flags),
            "login" => self.login(flags),
            "logout" => self.logout(flags),
            "query_profile" => self.query_profile(flags),
            "modify_profile" => self.modify_profile(flags),
            "add_train" => self.add_train(flags),
            "query_train" => self.query_train(flags),
            "buy_ticket" => self.buy_ticket(flags),
            "query_order" => self.query_order(flags),
            "refund_ticket" => self.refund_ticket(flags),
            "delete_train" | "release_train" | "query_ticket" | "query_transfer" => {
                "-1 (unimplemented)".to_string()
            }
            _ => "-1 (unknown command)".to_string(),
        }
    }

    fn add_user(&self, f: &HashMap<char, String>) -> String {
        let (Some(c), Some(u), Some(p), Some(n), Some(m)) =
            (f.get(&'c'), f.get(&'u'), f.get(&'p'), f.get(&'n'), f.get(&'m'))
        else {
            return "-1".into();
        };
        let privilege = f.get(&'g').and_then(|g| g.parse::<u8>().ok()).unwrap_or(0);
        match self.users.add_user(c, u, p, n, m, privilege) {
            Ok(()) => "0".into(),
            Err(()) => "-1".into(),
        }
    }

    fn login(&self, f: &HashMap<char, String>) -> String {
        let (Some(u), Some(p)) = (f.get(&'u'), f.get(&'p')) else {
            return "-1".into();
        };
        match self.users.login(u, p) {
            Ok(()) => "0".into(),
            Err(()) => "-1".into(),
        }
    }

    fn logout(&self, f: &HashMap<char, String>) -> String {
        let Some(u) = f.get(&'u') else { return "-1".into() };
        match self.users.logout(u) {
            Ok(()) => "0".into(),
            Err(()) => "-1".into(),
        }
    }

    fn query_profile(&self, f: &HashMap<char, String>) -> String {
        let (Some(c), Some(u)) = (f.get(&'c'), f.get(&'u')) else {
            return "-1".into();
        };
        match self.users.query_profile(c, u) {
            Ok(profile) => format!(
                "{} {} {} {}",
                profile.username.as_str(),
                profile.name.as_str(),
                profile.mailaddr.as_str(),
                profile.privilege
            ),
            Err(()) => "-1".into(),
        }
    }

    fn modify_profile(&self, f: &HashMap<char, String>) -> String {
        let (Some(c), Some(u)) = (f.get(&'c'), f.get(&'u')) else {
            return "-1".into();
        };
        let patch = ProfilePatch {
            password: f.get(&'p').cloned(),
            name: f.get(&'n').cloned(),
            mailaddr: f.get(&'m').cloned(),
            privilege: f.get(&'g').and_then(|g| g.parse::<u8>().ok()),
        };
        match self.users.modify_profile(c, u, patch) {
            Ok(profile) => format!(
                "{} {} {} {}",
                profile.username.as_str(),
                profile.name.as_str(),
                profile.mailaddr.as_str(),
                profile.privilege
            ),
            Err(()) => "-1".into(),
        }
    }

    /// `-i` id, `-n` station count, `-m` seat capacity, `-s` `|`-joined station
    /// names, `-p` `|`-joined per-segment prices, `-x` start time `HH:MM`, `-t`
    /// `|`-joined per-segment travel minutes, `-o` `|`-joined per-segment stopover
    /// minutes (`_` for none), `-d` `|`-joined sale start/end dates, `-y` train type.
    fn add_train(&self, f: &HashMap<char, String>) -> String {
        let Some(record) = parse_train(f) else {
            return "-1".into();
        };
        let Some(id) = f.get(&'i') else { return "-1".into() };
        match self.trains.add_train(record, hash64(id)) {
            Ok(()) => "0".into(),
            Err(()) => "-1".into(),
        }
    }

    fn query_train(&self, f: &HashMap<char, String>) -> String {
        let (Some(id), Some(date_str)) = (f.get(&'i'), f.get(&'d')) else {
            return "-1".into();
        };
        let Some(date) = parse_date(date_str) else { return "-1".into() };
        let Some(train) = self.trains.get(hash64(id)) else {
            return "-1".into();
        };
        if date < train.sale_start_day || date > train.sale_end_day {
            return "-1".into();
        }

        let mut out = String::new();
        out.push_str(train.train_id.as_str());
        out.push(' ');
        out.push(train.train_type as char);
        let mut minutes = train.start_time_minutes as u32;
        for i in 0..train.station_count as usize {
            if i > 0 {
                out.push_str(" -> ");
            }
            out.push_str(train.stations[i].as_str());
            out.push(' ');
            out.push_str(&format_time(minutes));
            if i + 1 < train.station_count as usize {
                let remaining = self.trains.seats_remaining(&train, hash64(id), date, i as u8);
                out.push_str(&format!(" {remaining}"));
                minutes += train.leg_minutes(i, i + 1);
            }
        }
        out
    }

    /// `-u` user, `-i` train id, `-d` date, `-n` number of seats, `-f` from station,
    /// `-t` to station, `-q` `true` to allow queueing past capacity.
    fn buy_ticket(&mut self, f: &HashMap<char, String>) -> String {
        let (Some(u), Some(i), Some(d), Some(n), Some(from), Some(to)) =
            (f.get(&'u'), f.get(&'i'), f.get(&'d'), f.get(&'n'), f.get(&'f'), f.get(&'t'))
        else {
            return "-1".into();
        };
        if !self.users.is_logged_in(u) {
            return "-1".into();
        }
        let Some(date) = parse_date(d) else { return "-1".into() };
        let Ok(num) = n.parse::<u16>() else { return "-1".into() };
        let allow_queue = f.get(&'q').map(|v| v == "true").unwrap_or(false);

        match self.tickets.buy(&self.trains, hash64(u), hash64(i), i, date, from, to, num, allow_queue) {
            Ok(PurchaseOutcome::Bought { price }) => price.to_string(),
            Ok(PurchaseOutcome::Queued) => "queue".into(),
            Err(()) => "-1".into(),
        }
    }

    fn query_order(&self, f: &HashMap<char, String>) -> String {
        let Some(u) = f.get(&'u') else { return "-1".into() };
        if !self.users.is_logged_in(u) {
            return "-1".into();
        }
        let orders = self.tickets.orders_for_user(hash64(u));
        let mut out = orders.len().to_string();
        for order in orders {
            let status = match order.status() {
                OrderStatus::Success => "success",
                OrderStatus::Pending => "pending",
                OrderStatus::Refunded => "refunded",
            };
            out.push('\n');
            out.push_str(&format!(
                "[{status}] {} {} -> {} {} {}",
                order.train_id.as_str(),
                order.from.as_str(),
                order.to.as_str(),
                order.num,
                order.price
            ));
        }
        out
    }

    fn refund_ticket(&mut self, f: &HashMap<char, String>) -> String {
        let Some(u) = f.get(&'u') else { return "-1".into() };
        if !self.users.is_logged_in(u) {
            return "-1".into();
        }
        let n = f.get(&'n').and_then(|n| n.parse::<usize>().ok()).unwrap_or(1);
        match self.tickets.refund(&self.trains, hash64(u), n) {
            Ok(()) => "0".into(),
            Err(()) => "-1".into(),
        }
    }
}

fn parse_train(f: &HashMap<char, String>) -> Option<TrainRecord> {
    let station_names: Vec<&str> = f.get(&'s')?.split('|').collect();
    if station_names.is_empty() || station_names.len() > MAX_STATIONS {
        return None;
    }
    let station_count = station_names.len();
    let segment_count = station_count - 1;

    let prices: Vec<u16> = f.get(&'p')?.split('|').map(|p| p.parse().unwrap_or(0)).collect();
    let travel: Vec<u16> = f.get(&'t')?.split('|').map(|t| t.parse().unwrap_or(0)).collect();
    let stopovers: Vec<u16> = f
        .get(&'o')
        .map(|o| o.split('|').map(|s| if s == "_" { 0 } else { s.parse().unwrap_or(0) }).collect())
        .unwrap_or_default();
    if prices.len() != segment_count || travel.len() != segment_count {
        return None;
    }

    let (start_str, end_str) = f.get(&'d')?.split_once('|')?;
    let sale_start_day = parse_date(start_str)?;
    let sale_end_day = parse_date(end_str)?;

    let mut stations = [crate::domain::encoding::FixedStr::<16>::default(); MAX_STATIONS];
    for (i, name) in station_names.iter().enumerate() {
        stations[i] = crate::domain::encoding::FixedStr::new(name);
    }
    let mut price_arr = [0u16; MAX_SEGMENTS];
    let mut travel_arr = [0u16; MAX_SEGMENTS];
    let mut stopover_arr = [0u16; MAX_SEGMENTS - 1];
    price_arr[..segment_count].copy_from_slice(&prices);
    travel_arr[..segment_count].copy_from_slice(&travel);
    if segment_count > 1 {
        let n = (segment_count - 1).min(stopovers.len());
        stopover_arr[..n].copy_from_slice(&stopovers[..n]);
    }

    Some(TrainRecord {
        train_id: crate::domain::encoding::FixedStr::new(f.get(&'i')?),
        station_count: station_count as u8,
        stations,
        seat_capacity: f.get(&'m')?.parse().ok()?,
        prices: price_arr,
        start_time_minutes: parse_time(f.get(&'x')?)?,
        travel_minutes: travel_arr,
        stopover_minutes: stopover_arr,
        sale_start_day,
        sale_end_day,
        train_type: f.get(&'y').and_then(|y| y.bytes().next()).unwrap_or(b'G'),
    })
}

fn split_timestamp(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if !line.starts_with('[') {
        return None;
    }
    let end = line.find(']')?;
    Some((&line[..=end], line[end + 1..].trim()))
}

fn parse_flags<'a>(tokens: impl Iterator<Item = &'a str>) -> HashMap<char, String> {
    let mut flags = HashMap::new();
    let mut tokens = tokens.peekable();
    while let Some(token) = tokens.next() {
        if let Some(flag) = token.strip_prefix('-') {
            if flag.len() == 1 {
                if let Some(value) = tokens.next() {
                    flags.insert(flag.chars().next().unwrap(), value.to_string());
                }
            }
        }
    }
    flags
}

/// `MM-DD` into a day-of-year-ish ordinal (`month * 31 + day`); only relative order
/// within a single CLI session's dates matters, so calendar fidelity (variable month
/// lengths) is not needed.
pub fn parse_date(s: &str) -> Option<u16> {
    let (month, day) = s.split_once('-')?;
    let month: u16 = month.parse().ok()?;
    let day: u16 = day.parse().ok()?;
    Some(month * 31 + day)
}

/// `HH:MM` into minutes past midnight.
pub fn parse_time(s: &str) -> Option<u16> {
    let (hour, minute) = s.split_once(':')?;
    let hour: u16 = hour.parse().ok()?;
    let minute: u16 = minute.parse().ok()?;
    Some(hour * 60 + minute)
}

fn format_time(total_minutes: u32) -> String {
    let day = total_minutes / (24 * 60);
    let minutes_in_day = total_minutes % (24 * 60);
    format!("+{day}d {:02}:{:02}", minutes_in_day / 60, minutes_in_day % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn split_timestamp_separates_bracket_and_rest() {
        let (ts, rest) = split_timestamp("[3] add_user -c root -u root").unwrap();
        assert_eq!(ts, "[3]");
        assert_eq!(rest, "add_user -c root -u root");
    }

    #[test]
    fn parse_date_orders_months_before_days() {
        assert!(parse_date("06-01").unwrap() < parse_date("07-01").unwrap());
        assert!(parse_date("06-01").unwrap() < parse_date("06-02").unwrap());
    }

    #[test]
    fn full_session_add_user_login_add_train_buy_and_query() {
        let dir = tempdir().unwrap();
        let mut dispatcher = Dispatcher::open(dir.path());

        let (out, keep_going) = dispatcher.dispatch("[1] add_user -c root -u root -p pw -n Root -m r@x.com -g 10");
        assert_eq!(out, "[1] 0");
        assert!(keep_going);

        let (out, _) = dispatcher.dispatch("[2] login -u root -p pw");
        assert_eq!(out, "[2] 0");

        let (out, _) = dispatcher.dispatch(
            "[3] add_train -i G1 -n 3 -m 2 -s A|B|C -p 10|20 -x 08:00 -t 60|90 -o _ -d 06-01|06-30 -y G",
        );
        assert_eq!(out, "[3] 0");

        let (out, _) = dispatcher.dispatch("[4] buy_ticket -u root -i G1 -d 06-10 -n 1 -f A -t C");
        assert_eq!(out, "[4] 30");

        let (out, _) = dispatcher.dispatch("[5] query_order -u root");
        assert!(out.starts_with("[5] 1"));

        let (out, keep_going) = dispatcher.dispatch("[6] exit");
        assert_eq!(out, "[6] bye");
        assert!(!keep_going);
    }

    #[test]
    fn clean_resets_all_tables() {
        let dir = tempdir().unwrap();
        let mut dispatcher = Dispatcher::open(dir.path());
        dispatcher.dispatch("[1] add_user -c root -u root -p pw -n Root -m r@x.com -g 10");
        let (out, _) = dispatcher.dispatch("[2] clean");
        assert_eq!(out, "[2] 0");
        let (out, _) = dispatcher.dispatch("[3] login -u root -p pw");
        assert_eq!(out, "[3] -1");
    }
}
