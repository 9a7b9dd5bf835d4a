mod destination;
mod entry;
mod feed;
mod subscription;

pub use destination::{Destination, DestinationId};
pub use entry::{Enclosure, EntryId, NewSeenEntry, ParsedEntry, SeenEntry};
pub use feed::{Feed, FeedId, NewFeed};
pub use subscription::{NewSubscription, Subscription, SubscriptionTarget};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256, used for identities that must stay stable across
/// restarts and releases.
pub(crate) fn stable_hash(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Implements the SQLite conversions for a string-backed id newtype.
macro_rules! text_id_sql {
    ($ty:ident) => {
        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                rusqlite::types::ToSql::to_sql(&self.0)
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                <String as rusqlite::types::FromSql>::column_result(value).map($ty)
            }
        }
    };
}

pub(crate) use text_id_sql;
