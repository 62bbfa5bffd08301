use std::time::Duration;

use log::debug;

use crate::{LocationFix, RequestConfig};

/// Drops fixes that arrive too soon or too close to the last accepted one.
///
/// The first fix is always accepted. After that a fix passes only if more
/// than `interval` has elapsed since the last accepted fix *and* it lies
/// more than `smallest_displacement` metres away from it. Rejected fixes do
/// not move the reference point. Elapsed time is measured on the fixes' own
/// monotonic timestamps; a fix older than the reference counts as zero
/// elapsed.
#[derive(Debug, Clone)]
pub struct DisplacementFilter {
    interval: Duration,
    smallest_displacement: f64,
    verbose: bool,
    last: Option<LocationFix>,
}

impl DisplacementFilter {
    /// A filter with the given thresholds.
    #[must_use]
    pub fn new(interval: Duration, smallest_displacement: f32) -> Self {
        Self {
            interval,
            smallest_displacement: f64::from(smallest_displacement),
            verbose: false,
            last: None,
        }
    }

    /// A filter using the interval and displacement of `config`, logging
    /// decisions when `config.debug` is set.
    #[must_use]
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            verbose: config.debug,
            ..Self::new(config.interval, config.smallest_displacement)
        }
    }

    /// Decide whether `fix` is worth publishing; accepted fixes become the
    /// new reference.
    pub fn accept(&mut self, fix: &LocationFix) -> bool {
        let Some(last) = &self.last else {
            self.last = Some(fix.clone());
            return true;
        };

        let elapsed = fix.elapsed_realtime.saturating_sub(last.elapsed_realtime);
        let displacement = fix.distance_to(last);
        let accepted = elapsed > self.interval && displacement > self.smallest_displacement;
        if self.verbose {
            debug!(
                "filter: elapsed={elapsed:?} interval={:?} displacement={displacement:.1}m \
                 smallest={:.1}m accepted={accepted}",
                self.interval, self.smallest_displacement
            );
        }

        if accepted {
            self.last = Some(fix.clone());
        }
        accepted
    }

    /// Forget the reference fix; the next fix is accepted unconditionally.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// The last accepted fix.
    #[must_use]
    pub const fn last(&self) -> Option<&LocationFix> {
        self.last.as_ref()
    }
}
