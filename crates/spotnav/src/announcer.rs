//! Spoken guidance.
//!
//! The [`Announcer`] turns a step into a phrase and hands it to a
//! [`Speaker`] at most once per step transition. Any utterance still playing
//! is cancelled first, so speech never overlaps.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::route::{format_distance, ManeuverKind, Step};

/// Errors a speaker can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpeechError {
    /// No speech engine is available.
    #[error("speech engine unavailable")]
    Unavailable,

    /// The engine rejected the utterance.
    #[error("speech failed: {0}")]
    Failed(String),
}

/// A text-to-speech capability.
pub trait Speaker: Send + Sync + std::fmt::Debug {
    /// Start speaking `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot speak.
    fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Cancel any utterance in progress.
    fn cancel(&self);
}

/// Speaker that writes announcements to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        info!(text, "Announcement");
        Ok(())
    }

    fn cancel(&self) {}
}

/// Speaker with no engine behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct MutedSpeaker;

impl Speaker for MutedSpeaker {
    fn speak(&self, _text: &str) -> Result<(), SpeechError> {
        Err(SpeechError::Unavailable)
    }

    fn cancel(&self) {}
}

/// Compose the spoken phrase for a step.
#[must_use]
pub fn compose_phrase(step: &Step) -> String {
    let mut phrase = capitalize(step.maneuver.phrase());
    if step.distance_meters >= 1.0 && step.maneuver != ManeuverKind::Unknown {
        phrase.push_str(" and continue for ");
        phrase.push_str(&format_distance(step.distance_meters));
    }
    if step.instruction_text.is_empty() {
        phrase.push('.');
    } else {
        phrase.push_str(". ");
        phrase.push_str(&step.instruction_text);
    }
    phrase
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Deduplicating announcer.
#[derive(Debug)]
pub struct Announcer {
    speaker: Arc<dyn Speaker>,
    /// (route version, step index) of the last announcement.
    last: Option<(u64, usize)>,
    spoken: u64,
}

impl Announcer {
    /// Create an announcer speaking through `speaker`.
    #[must_use]
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker,
            last: None,
            spoken: 0,
        }
    }

    /// Number of utterances successfully handed to the speaker.
    #[must_use]
    pub fn spoken_count(&self) -> u64 {
        self.spoken
    }

    /// Announce `step` of route `version`.
    ///
    /// Returns the phrase when this is a new step transition, `None` when
    /// the same step of the same route was already announced. Speech only
    /// happens if `audio_enabled`; a failing speaker is skipped silently.
    pub fn announce(&mut self, step: &Step, version: u64, audio_enabled: bool) -> Option<String> {
        let key = (version, step.index);
        if self.last == Some(key) {
            return None;
        }
        self.last = Some(key);

        let phrase = compose_phrase(step);
        if audio_enabled {
            self.speaker.cancel();
            match self.speaker.speak(&phrase) {
                Ok(()) => self.spoken += 1,
                Err(e) => debug!(error = %e, step = step.index, "Skipping announcement"),
            }
        }
        Some(phrase)
    }

    /// Forget the last announced step, so the next one is spoken.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Cancel any utterance in progress.
    pub fn cancel(&self) {
        self.speaker.cancel();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::geo::LatLng;

    /// Speaker that records every call.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSpeaker {
        pub spoken: Mutex<Vec<String>>,
        pub cancels: Mutex<u32>,
        pub fail: bool,
    }

    impl RecordingSpeaker {
        pub(crate) fn spoken(&self) -> Vec<String> {
            self.spoken.lock().unwrap().clone()
        }

        pub(crate) fn cancels(&self) -> u32 {
            *self.cancels.lock().unwrap()
        }
    }

    impl Speaker for RecordingSpeaker {
        fn speak(&self, text: &str) -> Result<(), SpeechError> {
            if self.fail {
                return Err(SpeechError::Unavailable);
            }
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn cancel(&self) {
            *self.cancels.lock().unwrap() += 1;
        }
    }

    fn step(index: usize, instruction: &str, maneuver: ManeuverKind, dist: f64) -> Step {
        let mut step = Step::new(
            instruction,
            maneuver,
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 0.001),
            dist,
            10.0,
        );
        step.index = index;
        step
    }

    #[test]
    fn test_compose_phrase() {
        let s = step(0, "Turn <b>left</b> onto Main St", ManeuverKind::TurnLeft, 244.0);
        assert_eq!(
            compose_phrase(&s),
            "Turn left and continue for 240 m. Turn left onto Main St"
        );
    }

    #[test]
    fn test_compose_phrase_without_distance_or_text() {
        let s = step(0, "", ManeuverKind::Straight, 0.0);
        assert_eq!(compose_phrase(&s), "Continue straight.");
    }

    #[test]
    fn test_phrase_never_contains_markup() {
        let s = step(0, "<div>Destination&nbsp;on the <b>right</b></div>", ManeuverKind::Unknown, 0.0);
        let phrase = compose_phrase(&s);
        assert!(!phrase.contains('<'));
        assert!(phrase.ends_with("Destination on the right"));
    }

    #[test]
    fn test_same_step_announced_once() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = Announcer::new(speaker.clone());
        let s = step(2, "Go", ManeuverKind::Straight, 100.0);

        assert!(announcer.announce(&s, 1, true).is_some());
        assert!(announcer.announce(&s, 1, true).is_none());
        assert_eq!(speaker.spoken().len(), 1);
        assert_eq!(announcer.spoken_count(), 1);
    }

    #[test]
    fn test_new_route_version_allows_same_index() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = Announcer::new(speaker.clone());
        let s = step(0, "Go", ManeuverKind::Straight, 100.0);

        announcer.announce(&s, 1, true);
        announcer.announce(&s, 2, true);
        assert_eq!(speaker.spoken().len(), 2);
    }

    #[test]
    fn test_cancels_before_speaking() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = Announcer::new(speaker.clone());
        announcer.announce(&step(0, "a", ManeuverKind::Straight, 10.0), 1, true);
        announcer.announce(&step(1, "b", ManeuverKind::TurnRight, 10.0), 1, true);
        assert_eq!(speaker.cancels(), 2);
    }

    #[test]
    fn test_audio_disabled_is_silent_but_tracked() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = Announcer::new(speaker.clone());
        let s = step(0, "Go", ManeuverKind::Straight, 100.0);

        assert!(announcer.announce(&s, 1, false).is_some());
        assert!(speaker.spoken().is_empty());
        assert!(announcer.announce(&s, 1, true).is_none());
    }

    #[test]
    fn test_failing_speaker_degrades_silently() {
        let speaker = Arc::new(RecordingSpeaker {
            fail: true,
            ..RecordingSpeaker::default()
        });
        let mut announcer = Announcer::new(speaker);
        let s = step(0, "Go", ManeuverKind::Straight, 100.0);
        assert!(announcer.announce(&s, 1, true).is_some());
        assert_eq!(announcer.spoken_count(), 0);
    }

    #[test]
    fn test_reset_allows_reannounce() {
        let speaker = Arc::new(RecordingSpeaker::default());
        let mut announcer = Announcer::new(speaker.clone());
        let s = step(0, "Go", ManeuverKind::Straight, 100.0);
        announcer.announce(&s, 1, true);
        announcer.reset();
        announcer.announce(&s, 1, true);
        assert_eq!(speaker.spoken().len(), 2);
    }

    #[test]
    fn test_muted_speaker_reports_unavailable() {
        assert_eq!(MutedSpeaker.speak("hi"), Err(SpeechError::Unavailable));
        assert!(LogSpeaker.speak("hi").is_ok());
    }
}
