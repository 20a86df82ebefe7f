//! Edge-triggered cooling episode detector.

use time::OffsetDateTime;

use heatwatch_types::{CoolingEpisode, TriggerType};

/// What a cooling signal did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoolingTransition {
    /// Same state as before; nothing to record.
    Unchanged,
    Activated(CoolingEpisode),
    /// The open episode closed. `row_id` is `None` if its insert failed.
    Deactivated {
        episode: CoolingEpisode,
        row_id: Option<i64>,
    },
}

/// Tracks at most one open cooling episode and reacts only to transitions.
#[derive(Debug, Clone, Default)]
pub struct CoolingDetector {
    open: Option<(CoolingEpisode, Option<i64>)>,
}

impl CoolingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_episode(&self) -> Option<&CoolingEpisode> {
        self.open.as_ref().map(|(episode, _)| episode)
    }

    /// Feed one sample of the boolean "active" signal.
    ///
    /// `trigger` only matters on an inactive to active edge.
    pub fn observe(
        &mut self,
        active: bool,
        trigger: TriggerType,
        time: OffsetDateTime,
    ) -> CoolingTransition {
        match (self.open.take(), active) {
            (None, true) => {
                let episode = CoolingEpisode::open(time, trigger);
                self.open = Some((episode, None));
                CoolingTransition::Activated(episode)
            }
            (Some((mut episode, row_id)), false) => {
                episode.close(time);
                CoolingTransition::Deactivated { episode, row_id }
            }
            (still_open, _) => {
                self.open = still_open;
                CoolingTransition::Unchanged
            }
        }
    }

    /// Remember the row id the open episode was stored under.
    pub fn attach_row(&mut self, row_id: i64) {
        if let Some((_, id)) = self.open.as_mut() {
            *id = Some(row_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

    #[test]
    fn test_repeated_activation_is_noop() {
        let mut detector = CoolingDetector::new();
        assert!(matches!(
            detector.observe(true, TriggerType::Auto, T0),
            CoolingTransition::Activated(_)
        ));
        assert_eq!(
            detector.observe(true, TriggerType::Auto, T0 + Duration::seconds(5)),
            CoolingTransition::Unchanged
        );
        // The first activation is kept
        assert_eq!(detector.open_episode().unwrap().activated_at, T0);
    }

    #[test]
    fn test_repeated_deactivation_is_noop() {
        let mut detector = CoolingDetector::new();
        detector.observe(true, TriggerType::Manual, T0);
        let closed = detector.observe(false, TriggerType::Auto, T0 + Duration::seconds(90));
        let CoolingTransition::Deactivated { episode, row_id } = closed else {
            panic!("expected deactivation, got {closed:?}");
        };
        assert_eq!(episode.trigger, TriggerType::Manual);
        assert_eq!(episode.duration_secs, Some(90));
        assert_eq!(row_id, None);

        assert_eq!(
            detector.observe(false, TriggerType::Auto, T0 + Duration::seconds(95)),
            CoolingTransition::Unchanged
        );
        assert!(!detector.is_active());
    }

    #[test]
    fn test_deactivation_without_activation() {
        let mut detector = CoolingDetector::new();
        assert_eq!(
            detector.observe(false, TriggerType::Auto, T0),
            CoolingTransition::Unchanged
        );
    }

    #[test]
    fn test_row_id_attached() {
        let mut detector = CoolingDetector::new();
        detector.observe(true, TriggerType::Auto, T0);
        detector.attach_row(11);
        assert!(matches!(
            detector.observe(false, TriggerType::Auto, T0),
            CoolingTransition::Deactivated { row_id: Some(11), .. }
        ));
    }

    #[test]
    fn test_backwards_clock_clamps_duration() {
        let mut detector = CoolingDetector::new();
        detector.observe(true, TriggerType::Auto, T0);
        let CoolingTransition::Deactivated { episode, .. } =
            detector.observe(false, TriggerType::Auto, T0 - Duration::seconds(3))
        else {
            panic!("expected deactivation");
        };
        assert_eq!(episode.deactivated_at, Some(T0));
        assert_eq!(episode.duration_secs, Some(0));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn edges_alternate(signals in proptest::collection::vec(any::<bool>(), 0..100)) {
                let mut detector = CoolingDetector::new();
                let mut active = false;
                for (i, signal) in signals.into_iter().enumerate() {
                    let t = T0 + Duration::seconds(i as i64);
                    match detector.observe(signal, TriggerType::Auto, t) {
                        CoolingTransition::Activated(_) => {
                            prop_assert!(!active && signal);
                            active = true;
                        }
                        CoolingTransition::Deactivated { episode, .. } => {
                            prop_assert!(active && !signal);
                            prop_assert!(episode.duration_secs.unwrap() >= 0);
                            active = false;
                        }
                        CoolingTransition::Unchanged => prop_assert_eq!(active, signal),
                    }
                    prop_assert_eq!(detector.is_active(), active);
                }
            }
        }
    }
}
