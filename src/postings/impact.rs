/// A (term frequency, length norm) pair seen in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impact {
    pub freq: u32,
    pub norm: u64,
}

/// Collects the pairs of a block that could produce the best score: a pair is
/// dropped once another one has a freq at least as high and a norm at least as
/// low. Norms compare as unsigned integers.
#[derive(Debug, Default, Clone)]
pub struct CompetitiveImpactAccumulator {
    // strictly increasing in both freq and norm
    impacts: Vec<Impact>,
}

impl CompetitiveImpactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.impacts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.impacts.is_empty()
    }

    pub fn add(&mut self, freq: u32, norm: u64) {
        let idx = self.impacts.partition_point(|i| i.freq < freq);
        if self.impacts[idx..].first().is_some_and(|i| i.norm <= norm) {
            return;
        }
        // entries before `idx` have a lower freq; drop those that are not better on norm
        let keep_from = self.impacts[..idx].partition_point(|i| i.norm < norm);
        let replace_to = if self.impacts.get(idx).is_some_and(|i| i.freq == freq) {
            idx + 1
        } else {
            idx
        };
        self.impacts.drain(keep_from..replace_to);
        self.impacts.insert(keep_from, Impact { freq, norm });
    }

    pub fn add_all(&mut self, other: &CompetitiveImpactAccumulator) {
        for impact in &other.impacts {
            self.add(impact.freq, impact.norm);
        }
    }

    /// Competitive pairs, by increasing freq.
    pub fn impacts(&self) -> &[Impact] {
        &self.impacts
    }

    pub fn max_freq(&self) -> u32 {
        self.impacts.last().map_or(0, |i| i.freq)
    }

    pub fn min_norm(&self) -> u64 {
        self.impacts.first().map_or(0, |i| i.norm)
    }
}
