//! Cache key definitions.
//!
//! Every cached family is addressed as `{prefix}:{id}`; the lock guarding a
//! family member lives at `lock:{prefix}:{id}`.

use std::fmt::{self, Display};

use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

const LOCK_NAMESPACE: &str = "lock";
const ID_COUNTER_NAMESPACE: &str = "icr";
const DAY_BUCKET_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]:[month]:[day]");

/// Namespace of one cached entity family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPrefix(&'static str);

impl KeyPrefix {
    /// Shops cached by id.
    pub const SHOP: KeyPrefix = KeyPrefix("cache:shop");
    /// The ordered shop-type list.
    pub const SHOP_TYPE: KeyPrefix = KeyPrefix("cache:shop-type");

    pub const fn new(prefix: &'static str) -> Self {
        Self(prefix)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn key(&self, id: impl Display) -> String {
        format!("{}:{id}", self.0)
    }

    /// Lock name (without the `lock:` namespace) guarding a rebuild of `id`.
    pub fn lock_name(&self, id: impl Display) -> String {
        self.key(id)
    }
}

impl Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Full store key of a named distributed lock.
pub fn lock_key(name: &str) -> String {
    format!("{LOCK_NAMESPACE}:{name}")
}

/// Lock name serializing one user's order attempts.
pub fn order_lock_name(user_id: i64) -> String {
    format!("order:{user_id}")
}

/// Day-bucketed counter key backing the id generator.
pub fn id_counter_key(business_tag: &str, day: Date) -> String {
    let bucket = day
        .format(DAY_BUCKET_FORMAT)
        .unwrap_or_else(|_| day.to_julian_day().to_string());
    format!("{ID_COUNTER_NAMESPACE}:{business_tag}:{bucket}")
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn family_and_lock_keys_share_layout() {
        assert_eq!(KeyPrefix::SHOP.key(42), "cache:shop:42");
        assert_eq!(lock_key(&KeyPrefix::SHOP.lock_name(42)), "lock:cache:shop:42");
        assert_eq!(KeyPrefix::SHOP_TYPE.key("list"), "cache:shop-type:list");
    }

    #[test]
    fn order_locks_are_per_user() {
        assert_eq!(lock_key(&order_lock_name(7)), "lock:order:7");
        assert_ne!(order_lock_name(7), order_lock_name(8));
    }

    #[test]
    fn id_counter_key_embeds_calendar_day() {
        assert_eq!(
            id_counter_key("order", date!(2024 - 03 - 09)),
            "icr:order:2024:03:09"
        );
        assert_ne!(
            id_counter_key("order", date!(2024 - 03 - 09)),
            id_counter_key("order", date!(2024 - 03 - 10))
        );
    }
}
