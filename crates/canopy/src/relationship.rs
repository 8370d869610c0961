use std::fmt;

/// A structural relation between a node and the nodes around it.
///
/// Each relationship is usable two ways: as a selector (`child { ... }`) and as an
/// engine function (`child_matches(condition)`) that finds the related node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    Parent,
    Ancestor,
    Child,
    Descendant,
    PreviousSibling,
    NextSibling,
}

impl Relationship {
    pub const ALL: [Self; 6] = [
        Self::Parent,
        Self::Ancestor,
        Self::Child,
        Self::Descendant,
        Self::PreviousSibling,
        Self::NextSibling,
    ];

    pub fn selector_name(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Ancestor => "ancestor",
            Self::Child => "child",
            Self::Descendant => "descendant",
            Self::PreviousSibling => "previous_sibling",
            Self::NextSibling => "next_sibling",
        }
    }

    pub fn function_name(self) -> &'static str {
        match self {
            Self::Parent => "parent_matches",
            Self::Ancestor => "ancestor_matches",
            Self::Child => "child_matches",
            Self::Descendant => "descendant_matches",
            Self::PreviousSibling => "previous_sibling_matches",
            Self::NextSibling => "next_sibling_matches",
        }
    }

    pub fn from_selector_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|relationship| relationship.selector_name() == name)
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|relationship| relationship.function_name() == name)
    }

    /// The relationship seen from the other end: a node's child has that node as parent.
    pub fn reciprocal(self) -> Self {
        match self {
            Self::Parent => Self::Child,
            Self::Child => Self::Parent,
            Self::Ancestor => Self::Descendant,
            Self::Descendant => Self::Ancestor,
            Self::PreviousSibling => Self::NextSibling,
            Self::NextSibling => Self::PreviousSibling,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for relationship in Relationship::ALL {
            assert_eq!(
                Relationship::from_selector_name(relationship.selector_name()),
                Some(relationship)
            );
            assert_eq!(
                Relationship::from_function_name(relationship.function_name()),
                Some(relationship)
            );
            assert_eq!(relationship.reciprocal().reciprocal(), relationship);
        }
        assert_eq!(Relationship::from_selector_name("sibling"), None);
        assert_eq!(Relationship::from_function_name("parent"), None);
    }
}
