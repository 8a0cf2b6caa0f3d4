//! The user accounts table: a unique-key B+ tree keyed by username hash, plus an
//! in-memory "currently logged in" set (SPEC_FULL.md §1, course-project origin
//! `management/user.{h,cpp}`).

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

use crate::domain::encoding::{hash64, FixedStr};
use crate::domain::table::open_tree;
use crate::storage::index::node::IndexValue;
use crate::storage::index::{BPlusTree, NaturalOrdComparator};

const USERNAME_LEN: usize = 20;
const PASSWORD_LEN: usize = 30;
const NAME_LEN: usize = 15;
const MAIL_LEN: usize = 30;

/// 96 bytes: username/password/name/mail fixed fields plus a privilege level
/// (0..=10, higher can create/modify lower-or-equal accounts).
#[derive(Clone, Copy, Debug)]
pub struct UserRecord {
    pub username: FixedStr<USERNAME_LEN>,
    pub password: FixedStr<PASSWORD_LEN>,
    pub name: FixedStr<NAME_LEN>,
    pub mailaddr: FixedStr<MAIL_LEN>,
    pub privilege: u8,
}

impl IndexValue for UserRecord {
    const ENCODED_SIZE: usize = USERNAME_LEN + PASSWORD_LEN + NAME_LEN + MAIL_LEN + 1;

    fn encode(&self, out: &mut [u8]) {
        let mut off = 0;
        self.username.encode(&mut out[off..off + USERNAME_LEN]);
        off += USERNAME_LEN;
        self.password.encode(&mut out[off..off + PASSWORD_LEN]);
        off += PASSWORD_LEN;
        self.name.encode(&mut out[off..off + NAME_LEN]);
        off += NAME_LEN;
        self.mailaddr.encode(&mut out[off..off + MAIL_LEN]);
        off += MAIL_LEN;
        out[off] = self.privilege;
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut off = 0;
        let username = FixedStr::decode(&bytes[off..off + USERNAME_LEN]);
        off += USERNAME_LEN;
        let password = FixedStr::decode(&bytes[off..off + PASSWORD_LEN]);
        off += PASSWORD_LEN;
        let name = FixedStr::decode(&bytes[off..off + NAME_LEN]);
        off += NAME_LEN;
        let mailaddr = FixedStr::decode(&bytes[off..off + MAIL_LEN]);
        off += MAIL_LEN;
        let privilege = bytes[off];
        Self { username, password, name, mailaddr, privilege }
    }
}

/// Fields a `modify_profile` call may overwrite; `None` means "leave unchanged".
#[derive(Default)]
pub struct ProfilePatch {
    pub password: Option<String>,
    pub name: Option<String>,
    pub mailaddr: Option<String>,
    pub privilege: Option<u8>,
}

type UserTree = BPlusTree<u64, UserRecord, NaturalOrdComparator<u64>, NaturalOrdComparator<u64>>;

pub struct UserTable {
    users: UserTree,
    logged_in: Mutex<HashMap<u64, UserRecord>>,
}

impl UserTable {
    pub fn open(dir: &Path) -> Self {
        Self {
            users: open_tree(dir, "user", NaturalOrdComparator::new(), NaturalOrdComparator::new()),
            logged_in: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_logged_in(&self, username: &str) -> bool {
        self.logged_in.lock().contains_key(&hash64(username))
    }

    /// First account ever created is granted privilege 10 and needs no session;
    /// every subsequent `add_user` must come from a logged-in account whose
    /// privilege strictly exceeds the new account's.
    pub fn add_user(
        &self,
        cur_username: &str,
        username: &str,
        password: &str,
        name: &str,
        mailaddr: &str,
        privilege: u8,
    ) -> Result<(), ()> {
        let mut record = UserRecord {
            username: FixedStr::new(username),
            password: FixedStr::new(password),
            name: FixedStr::new(name),
            mailaddr: FixedStr::new(mailaddr),
            privilege,
        };

        if self.users.is_empty() {
            record.privilege = 10;
            return if self.users.insert(hash64(username), record) { Ok(()) } else { Err(()) };
        }

        let logged_in = self.logged_in.lock();
        let Some(cur_user) = logged_in.get(&hash64(cur_username)) else {
            return Err(());
        };
        if record.privilege >= cur_user.privilege {
            return Err(());
        }
        drop(logged_in);

        if self.users.insert(hash64(username), record) { Ok(()) } else { Err(()) }
    }

    pub fn login(&self, username: &str, password: &str) -> Result<(), ()> {
        let hash = hash64(username);
        let Some(record) = self.users.get_value(&hash) else {
            return Err(());
        };
        if record.password.as_str() != password {
            return Err(());
        }
        let mut logged_in = self.logged_in.lock();
        if logged_in.contains_key(&hash) {
            return Err(());
        }
        logged_in.insert(hash, record);
        Ok(())
    }

    pub fn logout(&self, username: &str) -> Result<(), ()> {
        let mut logged_in = self.logged_in.lock();
        if logged_in.remove(&hash64(username)).is_none() {
            return Err(());
        }
        Ok(())
    }

    pub fn query_profile(&self, cur_username: &str, username: &str) -> Result<UserRecord, ()> {
        let cur_hash = hash64(cur_username);
        let logged_in = self.logged_in.lock();
        let Some(cur_user) = logged_in.get(&cur_hash) else {
            return Err(());
        };
        let cur_privilege = cur_user.privilege;
        drop(logged_in);

        let hash = hash64(username);
        let Some(target) = self.users.get_value(&hash) else {
            return Err(());
        };
        if hash != cur_hash && cur_privilege <= target.privilege {
            return Err(());
        }
        Ok(target)
    }

    pub fn modify_profile(&self, cur_username: &str, username: &str, patch: ProfilePatch) -> Result<UserRecord, ()> {
        let cur_hash = hash64(cur_username);
        let logged_in_privilege = {
            let logged_in = self.logged_in.lock();
            let Some(cur_user) = logged_in.get(&cur_hash) else {
                return Err(());
            };
            cur_user.privilege
        };
        if let Some(p) = patch.privilege {
            if p >= logged_in_privilege {
                return Err(());
            }
        }

        let hash = hash64(username);
        let Some(mut target) = self.users.get_value(&hash) else {
            return Err(());
        };
        if hash != cur_hash && target.privilege >= logged_in_privilege {
            return Err(());
        }

        if let Some(p) = &patch.password {
            target.password = FixedStr::new(p);
        }
        if let Some(n) = &patch.name {
            target.name = FixedStr::new(n);
        }
        if let Some(m) = &patch.mailaddr {
            target.mailaddr = FixedStr::new(m);
        }
        if let Some(p) = patch.privilege {
            target.privilege = p;
        }

        self.users.remove(&hash);
        self.users.insert(hash, target);

        let mut logged_in = self.logged_in.lock();
        if logged_in.contains_key(&hash) {
            logged_in.insert(hash, target);
        }

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_user_is_privileged_and_others_require_a_session() {
        let dir = tempdir().unwrap();
        let users = UserTable::open(dir.path());
        assert!(users.add_user("root", "root", "pw", "Root", "root@x.com", 0).is_ok());
        assert!(users.login("root", "pw").is_ok());
        assert!(users.add_user("root", "alice", "pw2", "Alice", "a@x.com", 3).is_ok());
        assert!(users.add_user("ghost", "bob", "pw3", "Bob", "b@x.com", 3).is_err());
    }

    #[test]
    fn login_rejects_wrong_password_and_double_login() {
        let dir = tempdir().unwrap();
        let users = UserTable::open(dir.path());
        users.add_user("root", "root", "pw", "Root", "root@x.com", 0).unwrap();
        assert!(users.login("root", "wrong").is_err());
        assert!(users.login("root", "pw").is_ok());
        assert!(users.login("root", "pw").is_err());
    }

    #[test]
    fn modify_profile_updates_persist() {
        let dir = tempdir().unwrap();
        let users = UserTable::open(dir.path());
        users.add_user("root", "root", "pw", "Root", "root@x.com", 0).unwrap();
        users.login("root", "pw").unwrap();
        let patch = ProfilePatch { name: Some("New Name".into()), ..Default::default() };
        let updated = users.modify_profile("root", "root", patch).unwrap();
        assert_eq!(updated.name.as_str(), "New Name");
        let fetched = users.query_profile("root", "root").unwrap();
        assert_eq!(fetched.name.as_str(), "New Name");
    }
}
