use std::collections::BTreeSet;
use std::fmt;

/// The steps whose samples get written out. Empty means "every step".
///
/// Every process derives the same selector from the same configuration, so
/// the persist decision agrees across the group without any communication.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpSelector {
    steps: BTreeSet<u64>,
}

impl DumpSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I: IntoIterator<Item = u64>>(steps: I) -> Self {
        DumpSelector {
            steps: steps.into_iter().collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = u64> + '_ {
        self.steps.iter().copied()
    }

    pub fn contains(&self, step: u64) -> bool {
        self.steps.contains(&step)
    }
}

impl fmt::Display for DumpSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return f.write_str("all");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Whether the samples of `step` (the first step is 0) should be persisted.
#[inline]
pub fn should_persist(step: u64, selector: &DumpSelector) -> bool {
    selector.is_all() || selector.contains(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_persists_everything() {
        let all = DumpSelector::all();
        for step in [0, 1, 2, 31, 32, u64::MAX].iter() {
            assert!(should_persist(*step, &all));
        }
    }

    #[test]
    fn explicit_selector_persists_only_listed_steps() {
        let selector = DumpSelector::only(vec![0, 2, 7]);
        let persisted: Vec<u64> = (0..10).filter(|s| should_persist(*s, &selector)).collect();
        assert_eq!(persisted, vec![0, 2, 7]);
    }

    #[test]
    fn displays_sorted_steps() {
        assert_eq!(DumpSelector::only(vec![9, 3, 3, 1]).to_string(), "1, 3, 9");
        assert_eq!(DumpSelector::all().to_string(), "all");
    }
}
