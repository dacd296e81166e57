use std::collections::HashMap;

/// Per-document length norms of a field.
pub trait NormsRead {
    /// `None` when the document has no norm; callers treat that as a norm of 1.
    fn norm(&self, doc_id: u32) -> Option<u64>;
}

/// Dense norms indexed by document id.
impl NormsRead for Vec<u64> {
    fn norm(&self, doc_id: u32) -> Option<u64> {
        self.get(doc_id as usize).copied()
    }
}

impl NormsRead for HashMap<u32, u64> {
    fn norm(&self, doc_id: u32) -> Option<u64> {
        self.get(&doc_id).copied()
    }
}

/// For fields that omit norms.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNorms;

impl NormsRead for NoNorms {
    fn norm(&self, _doc_id: u32) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        let dense = vec![3u64, 0, 9];
        assert_eq!(dense.norm(2), Some(9));
        assert_eq!(dense.norm(3), None);

        let sparse: HashMap<u32, u64> = [(100, 4)].into_iter().collect();
        assert_eq!(sparse.norm(100), Some(4));
        assert_eq!(sparse.norm(0), None);

        assert_eq!(NoNorms.norm(0), None);
    }
}
