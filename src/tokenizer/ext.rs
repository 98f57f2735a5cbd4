use extend::ext;

use super::Token;

#[ext(pub, name = TokenListExt)]
impl Vec<Token> {
    /// Makes one left-to-right pass merging every adjacent `left`, `right`
    /// pair into `left + right`. Scanning resumes right after a merged token,
    /// so a freshly merged token is never matched again by the same rule.
    ///
    /// Returns the number of merges performed.
    fn apply_merge(&mut self, left: &str, right: &str) -> usize {
        let mut merged = 0;
        let mut idx = 0;

        while idx + 1 < self.len() {
            if self[idx] == left && self[idx + 1] == right {
                let tail = self.remove(idx + 1);
                self[idx].push_str(&tail);
                merged += 1;
            }
            idx += 1;
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<Token> {
        s.chars().map(String::from).collect()
    }

    #[test]
    fn merges_every_adjacent_pair_in_one_pass() {
        let mut list = tokens("abxab");
        assert_eq!(list.apply_merge("a", "b"), 2);
        assert_eq!(list, vec!["ab", "x", "ab"]);
    }

    #[test]
    fn does_not_rematch_the_merged_token() {
        // after "aa" is built at 0 the scan continues at the third "a"
        let mut list = tokens("aaaa");
        assert_eq!(list.apply_merge("a", "a"), 2);
        assert_eq!(list, vec!["aa", "aa"]);

        let mut list = tokens("aaa");
        list.apply_merge("a", "a");
        assert_eq!(list, vec!["aa", "a"]);
    }

    #[test]
    fn leaves_non_matching_lists_alone() {
        let mut list = tokens("ba");
        assert_eq!(list.apply_merge("a", "b"), 0);
        assert_eq!(list, vec!["b", "a"]);

        let mut empty: Vec<Token> = Vec::new();
        assert_eq!(empty.apply_merge("a", "b"), 0);
    }
}
