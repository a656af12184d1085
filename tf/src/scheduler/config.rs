//! Scheduler configuration

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of workers, and so the most jobs running at once
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(SchedulerConfig::default().max_concurrent, 1);
    }

    #[test]
    fn test_zero_is_clamped() {
        assert_eq!(SchedulerConfig::with_max_concurrent(0).max_concurrent, 1);
    }
}
