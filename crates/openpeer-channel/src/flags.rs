//! Message kind flags.
//!
//! On the wire a kind is one integer: exactly one category bit OR-ed with
//! exactly one action bit. In code it is a [`Category`] / [`Action`] pair;
//! [`Kind`] keeps the raw bits so frames round-trip exactly, and decodes them
//! by membership (bitwise AND) rather than equality.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Who the message is for: the application, or the protocol itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Category {
    Common = 1,
    Internal = 1 << 1,
}

/// What the message does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Action {
    Heartbeat = 1 << 2,
    Reply = 1 << 3,
    Connect = 1 << 4,
    Disconnect = 1 << 5,
    Timeout = 1 << 6,
    Message = 1 << 7,
    Call = 1 << 8,
}

impl Category {
    pub const fn bits(self) -> u32 {
        self as u32
    }
}

impl Action {
    pub const fn bits(self) -> u32 {
        self as u32
    }

    // Order matters: a frame with the reply bit set is a reply, whatever else it carries.
    const PRECEDENCE: [Action; 7] = [
        Action::Reply,
        Action::Connect,
        Action::Disconnect,
        Action::Heartbeat,
        Action::Message,
        Action::Call,
        Action::Timeout,
    ];
}

/// Wire-level kind bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u32);

impl Kind {
    pub const fn new(category: Category, action: Action) -> Self {
        Self(category.bits() | action.bits())
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `flags` is set.
    pub const fn contains(self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    pub fn category(self) -> Option<Category> {
        if self.contains(Category::Internal.bits()) {
            Some(Category::Internal)
        } else if self.contains(Category::Common.bits()) {
            Some(Category::Common)
        } else {
            None
        }
    }

    pub fn action(self) -> Option<Action> {
        Action::PRECEDENCE
            .into_iter()
            .find(|action| self.contains(action.bits()))
    }

    pub fn is_reply(self) -> bool {
        self.contains(Action::Reply.bits())
    }
}

impl BitOr<Action> for Category {
    type Output = Kind;

    fn bitor(self, action: Action) -> Kind {
        Kind::new(self, action)
    }
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.category(), self.action()) {
            (Some(category), Some(action)) => {
                write!(f, "Kind({category:?}|{action:?} = {})", self.0)
            }
            _ => write!(f, "Kind({:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bit_values() {
        assert_eq!(Category::Common.bits(), 1);
        assert_eq!(Category::Internal.bits(), 2);
        assert_eq!(Action::Heartbeat.bits(), 4);
        assert_eq!(Action::Reply.bits(), 8);
        assert_eq!(Action::Connect.bits(), 16);
        assert_eq!(Action::Disconnect.bits(), 32);
        assert_eq!(Action::Timeout.bits(), 64);
        assert_eq!(Action::Message.bits(), 128);
        assert_eq!(Action::Call.bits(), 256);
    }

    #[test]
    fn combined_kinds() {
        assert_eq!((Category::Common | Action::Message).bits(), 129);
        assert_eq!((Category::Common | Action::Call).bits(), 257);
        assert_eq!((Category::Internal | Action::Connect).bits(), 18);
        assert_eq!((Category::Internal | Action::Reply).bits(), 10);
    }

    #[test]
    fn decodes_by_membership() {
        let kind = Kind::from_bits(10);
        assert_eq!(kind.category(), Some(Category::Internal));
        assert_eq!(kind.action(), Some(Action::Reply));
        assert!(kind.is_reply());
        assert!(!kind.contains(Action::Connect.bits()));
    }

    #[test]
    fn reply_wins_over_other_actions() {
        let kind = Kind::from_bits(Category::Internal.bits() | Action::Connect.bits() | 8);
        assert_eq!(kind.action(), Some(Action::Reply));
    }

    #[test]
    fn unflagged_kind_has_no_category_or_action() {
        let kind = Kind::from_bits(0);
        assert_eq!(kind.category(), None);
        assert_eq!(kind.action(), None);
        assert_eq!(format!("{kind:?}"), "Kind(0x0)");
    }

    #[test]
    fn serializes_as_plain_integer() {
        let kind = Category::Common | Action::Call;
        assert_eq!(serde_json::to_string(&kind).unwrap(), "257");
        let back: Kind = serde_json::from_str("257").unwrap();
        assert_eq!(back, kind);
    }
}
