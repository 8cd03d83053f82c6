use std::cell::Cell;
use std::fmt;

use enumset::{EnumSet, EnumSetType};

/// Properties discovered about the statement being analyzed.
#[derive(EnumSetType, Debug)]
pub enum QueryFlag {
    Aggregation,
    Insert,
    Update,
    Delete,
    Join,
    Subquery,
    Union,
    Sort,
    Limit,
    Trigger,
    Procedure,
    Transaction,
    /// At most one row can be returned.
    Max1Row,
}

/// Per-analysis flag set. Rules read and flip flags through a shared reference.
#[derive(Default)]
pub struct QueryFlags {
    flags: Cell<EnumSet<QueryFlag>>,
}

impl QueryFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flag: QueryFlag) {
        self.flags.set(self.flags.get() | flag);
    }

    pub fn unset(&self, flag: QueryFlag) {
        self.flags.set(self.flags.get() - flag);
    }

    pub fn is_set(&self, flag: QueryFlag) -> bool {
        self.flags.get().contains(flag)
    }

    pub fn all(&self) -> EnumSet<QueryFlag> {
        self.flags.get()
    }
}

impl fmt::Debug for QueryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.flags.get().iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_unset() {
        let flags = QueryFlags::new();
        flags.set(QueryFlag::Join);
        flags.set(QueryFlag::Max1Row);
        assert!(flags.is_set(QueryFlag::Join));
        flags.unset(QueryFlag::Max1Row);
        assert!(!flags.is_set(QueryFlag::Max1Row));
        assert_eq!(flags.all().len(), 1);
    }
}
