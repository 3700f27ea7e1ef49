//! attendo-core: Attendance tracking from face sightings.
//!
//! Matches extracted face vectors against an enrolled roster, turns the
//! per-frame sightings into presence intervals, and folds closed intervals
//! into per-person statistics. Vision and storage sit behind traits.

pub mod clock;
pub mod extractor;
pub mod frame;
pub mod matcher;
pub mod outbox;
pub mod roster;
pub mod session;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use extractor::{ExtractorError, FaceExtractor, FaceObservation};
pub use frame::{decode_image_payload, Frame, FrameError};
pub use matcher::{label_faces, DistanceMatcher, MatchResult, Matcher};
pub use outbox::{FlushReport, Outbox};
pub use roster::Roster;
pub use session::{SessionError, SessionId, SessionRegistry};
pub use stats::StatisticsBook;
pub use store::{EventStore, RosterStore, StoreError};
pub use tracker::{sightings, PresenceTracker, Sighting, UnknownPolicy};
pub use types::{
    AppearanceRecord, BoundingBox, Detection, FeatureVector, Metric, PersonStatistics, RosterEntry,
    Timestamp, UNKNOWN_LABEL,
};
