//! Per-run sequential user IDs, used to label plots.
//!
//! This mapping is reversible and therefore sensitive. It is a different thing from
//! [`AnonToken`](crate::anonymize::AnonToken) on purpose; nothing converts one into the other.

use std::{collections::HashMap, io::Write};

use color_eyre::{eyre::Context as _, Result};
use derive_more::derive::{Display, Into};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Into, Serialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Assigns [`UserId`]s in order of first appearance, starting at 0.
#[derive(Debug, Clone, Default)]
pub struct UserIdMap {
    by_name: HashMap<String, UserId>,
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MappingRow<'a> {
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "UserID")]
    user_id: UserId,
}

impl UserIdMap {
    pub fn from_users<'a>(users: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::default();
        for user in users {
            map.insert(user);
        }
        map
    }

    pub fn insert(&mut self, user: &str) -> UserId {
        if let Some(&id) = self.by_name.get(user) {
            return id;
        }
        // a run never sees anywhere near u32::MAX distinct users
        let id = UserId(u32::try_from(self.names.len()).unwrap_or(u32::MAX));
        self.by_name.insert(user.to_owned(), id);
        self.names.push(user.to_owned());
        id
    }

    pub fn id_of(&self, user: &str) -> Option<UserId> {
        self.by_name.get(user).copied()
    }

    pub fn name_of(&self, id: UserId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// (name, id) in ID order
    pub fn iter(&self) -> impl Iterator<Item = (&str, UserId)> + '_ {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), UserId(idx as u32)))
    }

    /// `Username,UserID` CSV, one row per user.
    pub fn write_csv(&self, writer: impl Write) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        for (username, user_id) in self.iter() {
            csv.serialize(MappingRow { username, user_id })
                .wrap_err_with(|| format!("writing user mapping row {user_id}"))?;
        }
        csv.flush().wrap_err("flushing user mapping")?;
        Ok(())
    }
}
