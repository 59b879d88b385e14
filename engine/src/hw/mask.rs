use std::fmt;

const WORD_BITS: usize = 64;

/// Growable set of channel bits, one per logical channel index.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ChannelMask {
    words: Vec<u64>,
}

impl ChannelMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask with the first `count` channels enabled.
    pub fn first(count: usize) -> Self {
        let mut mask = Self::new();
        mask.set_range(0, count, true);
        mask
    }

    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|w| w & (1u64 << (index % WORD_BITS)) != 0)
    }

    pub fn set(&mut self, index: usize, on: bool) {
        let word = index / WORD_BITS;
        if on {
            if word >= self.words.len() {
                self.words.resize(word + 1, 0);
            }
            self.words[word] |= 1u64 << (index % WORD_BITS);
        } else if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << (index % WORD_BITS));
            self.trim();
        }
    }

    pub fn set_range(&mut self, start: usize, len: usize, on: bool) {
        for index in start..start.saturating_add(len) {
            self.set(index, on);
        }
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn highest_bit(&self) -> Option<usize> {
        let last = self.words.len().checked_sub(1)?;
        let w = self.words[last];
        Some(last * WORD_BITS + (WORD_BITS - 1 - w.leading_zeros() as usize))
    }

    /// Clears every bit at or above `len`.
    pub fn truncate(&mut self, len: usize) {
        let full_words = len / WORD_BITS;
        let rem = len % WORD_BITS;
        if full_words < self.words.len() {
            if rem == 0 {
                self.words.truncate(full_words);
            } else {
                self.words.truncate(full_words + 1);
                self.words[full_words] &= (1u64 << rem) - 1;
            }
        }
        self.trim();
    }

    /// Keeps only the lowest `max` set bits.
    pub fn keep_lowest(&mut self, max: usize) {
        let cut = self.iter().nth(max);
        if let Some(cut) = cut {
            self.truncate(cut);
        }
    }

    pub fn or_with(&mut self, other: &ChannelMask) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= src;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..WORD_BITS)
                .filter(move |&bit| w & (1u64 << bit) != 0)
                .map(move |bit| wi * WORD_BITS + bit)
        })
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl FromIterator<usize> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = ChannelMask::new();
        for index in iter {
            mask.set(index, true);
        }
        mask
    }
}

impl fmt::Debug for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_count() {
        let mut mask = ChannelMask::new();
        mask.set(3, true);
        mask.set(130, true);
        assert!(mask.get(3));
        assert!(mask.get(130));
        assert!(!mask.get(4));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.highest_bit(), Some(130));
        mask.set(130, false);
        assert_eq!(mask.highest_bit(), Some(3));
    }

    #[test]
    fn truncate_clears_bits_past_named_channels() {
        let mut mask = ChannelMask::first(100);
        mask.truncate(6);
        assert_eq!(mask.count(), 6);
        assert_eq!(mask.highest_bit(), Some(5));
        mask.truncate(0);
        assert!(mask.is_empty());
    }

    #[test]
    fn keep_lowest_limits_active_channels() {
        let mut mask: ChannelMask = [1, 4, 9, 70].into_iter().collect();
        mask.keep_lowest(2);
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn or_with_unions() {
        let mut a: ChannelMask = [0, 1].into_iter().collect();
        let b: ChannelMask = [1, 65].into_iter().collect();
        a.or_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 1, 65]);
    }
}
