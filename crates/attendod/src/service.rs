use crate::worker::{StoreHandle, WorkerError};
use attendo_core::frame::{decode_image_payload, to_data_url, FrameError};
use attendo_core::{
    label_faces, sightings, AppearanceRecord, Clock, Detection, DistanceMatcher, ExtractorError,
    FaceExtractor, FlushReport, Roster, RosterEntry, RosterStore, SessionError, SessionId,
    SessionRegistry, StoreError, Timestamp, UnknownPolicy, UNKNOWN_LABEL,
};
use attendo_store::{DailySummary, ExportDocument};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

const MAX_LABEL_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid image: {0}")]
    Frame(#[from] FrameError),
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected; enrollment needs exactly one person in frame")]
    MultipleFaces(usize),
    #[error("face extraction failed: {0}")]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("persistence unavailable: {0}")]
    Worker(#[from] WorkerError),
    #[error("could not write photo: {0}")]
    Photo(std::io::Error),
}

/// Matching and tracking policy.
#[derive(Debug, Clone)]
pub struct Settings {
    pub matcher: DistanceMatcher,
    pub unknown_policy: UnknownPolicy,
    pub tracking_timeout: Duration,
    pub photo_dir: PathBuf,
}

/// How the closed intervals of a request fared in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistenceStatus {
    /// Records written during this request, including earlier retries.
    pub persisted: usize,
    /// Records still queued for a later attempt.
    pub pending: usize,
    /// Records the store refused permanently.
    pub rejected: usize,
    /// Records dropped because the store thread is gone.
    pub lost: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistenceStatus {
    fn from_report(report: FlushReport) -> Self {
        Self {
            persisted: report.applied.len(),
            pending: report.pending,
            rejected: report.rejected.len(),
            lost: 0,
            error: report.error.map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Recognition {
    pub faces: Vec<Detection>,
    /// Intervals that closed on this frame.
    pub closed: Vec<AppearanceRecord>,
    /// Labels the session currently considers present.
    pub present: Vec<String>,
    pub persistence: PersistenceStatus,
}

#[derive(Debug, Serialize)]
pub struct SessionClosed {
    pub session_id: SessionId,
    pub closed: Vec<AppearanceRecord>,
    pub persistence: PersistenceStatus,
}

#[derive(Debug, Serialize)]
pub struct FaceListing {
    pub name: String,
    pub created_at: Timestamp,
    /// Enrollment photo as a data URL, when the file is still readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: Timestamp,
    pub version: &'static str,
    pub registered_faces: usize,
    pub sessions: usize,
    pub pending_records: usize,
}

/// Recognition, enrollment and reporting over shared roster, sessions and store.
#[derive(Clone)]
pub struct AttendanceService {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    roster: Roster,
    /// Held across observe and persist so records reach the store in
    /// observation order, and so roster removals cannot interleave.
    sessions: Mutex<SessionRegistry>,
    roster_writer: Mutex<()>,
    store: StoreHandle,
    extractor: Arc<dyn FaceExtractor>,
    clock: Arc<dyn Clock>,
}

impl AttendanceService {
    /// Build the service, loading the roster from the store.
    pub async fn start(
        settings: Settings,
        store: StoreHandle,
        extractor: Arc<dyn FaceExtractor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let entries = store.call(|b| b.store.load_roster()).await??;
        tracing::info!(count = entries.len(), "roster loaded");

        let sessions = SessionRegistry::new(settings.tracking_timeout, clock.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                roster: Roster::new(entries),
                sessions: Mutex::new(sessions),
                roster_writer: Mutex::new(()),
                settings,
                store,
                extractor,
                clock,
            }),
        })
    }

    /// Label the faces in one frame and advance the session's tracker.
    pub async fn recognize(&self, session: SessionId, image: &str) -> Result<Recognition, ServiceError> {
        if !self.inner.sessions.lock().await.contains(session) {
            return Err(SessionError::UnknownSession(session).into());
        }

        let frame = decode_image_payload(image)?;
        let faces = self.inner.extractor.detect_faces(&frame).await?;
        let snapshot = self.inner.roster.snapshot();
        let detections = label_faces(&self.inner.settings.matcher, faces, &snapshot);
        let visible = sightings(&detections, self.inner.settings.unknown_policy);

        let mut sessions = self.inner.sessions.lock().await;
        // Drop labels removed from the roster since the snapshot was taken.
        let enrolled: HashSet<String> = self.inner.roster.labels().into_iter().collect();
        let visible: Vec<_> = visible
            .into_iter()
            .filter(|s| s.label == UNKNOWN_LABEL || enrolled.contains(&s.label))
            .collect();

        let closed = sessions.observe(session, &visible)?;
        let present = sessions.present(session)?;
        let persistence = self.persist(closed.clone()).await;
        drop(sessions);

        tracing::debug!(
            session = %session,
            faces = detections.len(),
            present = present.len(),
            closed = closed.len(),
            "frame processed"
        );

        Ok(Recognition {
            faces: detections,
            closed,
            present,
            persistence,
        })
    }

    /// Enroll the single face in `image` under `label`.
    pub async fn enroll(&self, label: &str, image: &str) -> Result<FaceListing, ServiceError> {
        let label = validate_label(label)?;
        let frame = decode_image_payload(image)?;
        let mut faces = self.inner.extractor.detect_faces(&frame).await?;
        let face = match faces.len() {
            0 => return Err(ServiceError::NoFace),
            1 => faces.remove(0),
            n => return Err(ServiceError::MultipleFaces(n)),
        };

        let _writer = self.inner.roster_writer.lock().await;
        if self.inner.roster.contains(&label) {
            return Err(StoreError::DuplicateLabel(label).into());
        }

        let created_at = self.inner.clock.now();
        let photo_path = photo_path(
            &self.inner.settings.photo_dir,
            &label,
            created_at,
            Uuid::new_v4(),
            frame.extension(),
        );
        write_photo(&photo_path, &frame.data).await?;

        let entry = RosterEntry {
            label: label.clone(),
            feature_vector: face.feature_vector,
            photo_ref: Some(photo_path.to_string_lossy().into_owned()),
            created_at,
        };

        let stored = {
            let entry = entry.clone();
            self.inner
                .store
                .call(move |b| {
                    b.store.insert_entry(&entry)?;
                    b.store.load_roster()
                })
                .await
        };
        let entries = match stored {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                remove_photo(Some(&photo_path)).await;
                return Err(e.into());
            }
            Err(e) => {
                remove_photo(Some(&photo_path)).await;
                return Err(e.into());
            }
        };
        self.inner.roster.replace(entries);

        tracing::info!(label = %label, dim = entry.feature_vector.len(), "face enrolled");
        Ok(FaceListing {
            name: entry.label,
            created_at: entry.created_at,
            photo: None,
        })
    }

    /// Remove a person from the roster, with their history and open intervals.
    pub async fn remove(&self, label: &str) -> Result<(), ServiceError> {
        let _writer = self.inner.roster_writer.lock().await;
        let mut sessions = self.inner.sessions.lock().await;

        let owned = label.to_string();
        let (entry, entries) = self
            .inner
            .store
            .call(move |b| -> Result<_, StoreError> {
                let entry = b.store.delete_entry(&owned)?;
                let discarded = b.outbox.discard_label(&owned);
                if discarded > 0 {
                    tracing::warn!(label = %owned, discarded, "dropped queued appearances of removed label");
                }
                Ok((entry, b.store.load_roster()?))
            })
            .await??;

        self.inner.roster.replace(entries);
        let open = sessions.forget_label(label);
        drop(sessions);

        remove_photo(entry.photo_ref.as_deref().map(Path::new)).await;
        tracing::info!(label, open_sessions = open, "face removed");
        Ok(())
    }

    /// Enrolled faces, newest first.
    pub async fn list_faces(&self) -> Vec<FaceListing> {
        let snapshot = self.inner.roster.snapshot();
        let mut listings = Vec::with_capacity(snapshot.len());
        for entry in snapshot.iter().rev() {
            let photo = match &entry.photo_ref {
                Some(path) => tokio::fs::read(path).await.ok().map(|bytes| to_data_url(&bytes)),
                None => None,
            };
            listings.push(FaceListing {
                name: entry.label.clone(),
                created_at: entry.created_at,
                photo,
            });
        }
        listings
    }

    pub async fn start_session(&self) -> SessionId {
        self.inner.sessions.lock().await.start()
    }

    /// End a session, persisting whatever intervals it still had open.
    pub async fn end_session(&self, id: SessionId) -> Result<SessionClosed, ServiceError> {
        let mut sessions = self.inner.sessions.lock().await;
        let closed = sessions.end(id)?;
        let persistence = self.persist(closed.clone()).await;
        Ok(SessionClosed {
            session_id: id,
            closed,
            persistence,
        })
    }

    /// Close timed-out intervals in sessions that have stopped sending frames.
    pub async fn sweep(&self) -> PersistenceStatus {
        let mut sessions = self.inner.sessions.lock().await;
        let closed = sessions.expire_all();
        if !closed.is_empty() {
            tracing::debug!(closed = closed.len(), "sweeper closed idle intervals");
        }
        self.persist(closed).await
    }

    /// Close everything still open and persist it. Called on shutdown.
    pub async fn shutdown(&self) -> PersistenceStatus {
        let mut sessions = self.inner.sessions.lock().await;
        let closed = sessions.flush_all();
        tracing::info!(closed = closed.len(), "closing open intervals for shutdown");
        self.persist(closed).await
    }

    pub async fn statistics(&self, date: Option<NaiveDate>) -> Result<DailySummary, ServiceError> {
        let date = date.unwrap_or_else(|| self.inner.clock.now().date_naive());
        Ok(self.inner.store.call(move |b| b.store.daily_summary(date)).await??)
    }

    pub async fn export(&self) -> Result<ExportDocument, ServiceError> {
        let now = self.inner.clock.now();
        Ok(self.inner.store.call(move |b| b.store.export(now)).await??)
    }

    pub async fn health(&self) -> Health {
        let pending = self.inner.store.call(|b| b.outbox.len()).await;
        let sessions = self.inner.sessions.lock().await.len();
        Health {
            status: if pending.is_ok() { "healthy" } else { "degraded" },
            timestamp: self.inner.clock.now(),
            version: env!("CARGO_PKG_VERSION"),
            registered_faces: self.inner.roster.len(),
            sessions,
            pending_records: pending.unwrap_or(0),
        }
    }

    async fn persist(&self, records: Vec<AppearanceRecord>) -> PersistenceStatus {
        let count = records.len();
        match self.inner.store.persist(records).await {
            Ok(report) => PersistenceStatus::from_report(report),
            Err(e) => {
                tracing::error!(error = %e, lost = count, "store thread unavailable");
                PersistenceStatus {
                    lost: count,
                    error: Some(format!("{e}; {count} appearances lost")),
                    ..Default::default()
                }
            }
        }
    }
}

fn validate_label(label: &str) -> Result<String, ServiceError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ServiceError::InvalidLabel("label must not be empty".into()));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(ServiceError::InvalidLabel(format!("label longer than {MAX_LABEL_LEN} characters")));
    }
    if label.chars().any(char::is_control) {
        return Err(ServiceError::InvalidLabel("label contains control characters".into()));
    }
    if label == UNKNOWN_LABEL {
        return Err(ServiceError::InvalidLabel(format!("{UNKNOWN_LABEL:?} is reserved")));
    }
    Ok(label.to_string())
}

/// `<dir>/<label>_<YYYYmmdd_HHMMSS>_<id>.<ext>`, with the label made
/// filename-safe. Labels that sanitize alike still get distinct files.
fn photo_path(dir: &Path, label: &str, at: Timestamp, id: Uuid, ext: &str) -> PathBuf {
    let safe: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}_{}_{}.{ext}", at.format("%Y%m%d_%H%M%S"), id.simple()))
}

/// Write a new photo file; never replaces an existing one.
async fn write_photo(path: &Path, data: &[u8]) -> Result<(), ServiceError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(ServiceError::Photo)?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(ServiceError::Photo)?;
    file.write_all(data).await.map_err(ServiceError::Photo)?;
    file.flush().await.map_err(ServiceError::Photo)
}

async fn remove_photo(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove photo"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::worker::spawn_store;
    use attendo_core::extractor::FixedExtractor;
    use attendo_core::{BoundingBox, FaceObservation, FeatureVector, ManualClock};
    use attendo_store::SqliteStore;

    pub(crate) struct Fixture {
        pub service: AttendanceService,
        pub extractor: Arc<FixedExtractor>,
        pub clock: Arc<ManualClock>,
        pub store: StoreHandle,
        pub _photos: tempfile::TempDir,
    }

    pub(crate) async fn fixture(policy: UnknownPolicy) -> Fixture {
        fixture_on(policy, SqliteStore::open_in_memory().unwrap()).await
    }

    pub(crate) async fn fixture_on(policy: UnknownPolicy, store: SqliteStore) -> Fixture {
        let photos = tempfile::tempdir().unwrap();
        let store = spawn_store(store).unwrap();
        let extractor = Arc::new(FixedExtractor::default());
        let clock = Arc::new(ManualClock::at_epoch());
        let settings = Settings {
            matcher: DistanceMatcher::default(),
            unknown_policy: policy,
            tracking_timeout: Duration::from_secs(3),
            photo_dir: photos.path().to_path_buf(),
        };
        let service = AttendanceService::start(settings, store.clone(), extractor.clone(), clock.clone())
            .await
            .unwrap();
        Fixture {
            service,
            extractor,
            clock,
            store,
            _photos: photos,
        }
    }

    pub(crate) fn png_data_url() -> String {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 120, 150]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        to_data_url(&out.into_inner())
    }

    pub(crate) fn face(values: &[f32]) -> FaceObservation {
        FaceObservation {
            bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 8.0, height: 8.0 },
            feature_vector: FeatureVector::new(values.to_vec()),
        }
    }

    const ALICE: [f32; 3] = [0.1, 0.2, 0.3];

    async fn enroll_alice(f: &Fixture) {
        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.enroll("Alice", &png_data_url()).await.unwrap();
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let image = png_data_url();

        f.extractor.set_faces(vec![face(&ALICE)]);
        for _ in 0..=5 {
            let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
            assert_eq!(r.faces[0].matched_label, "Alice");
            assert_eq!(r.present, vec!["Alice".to_string()]);
            f.clock.advance_secs_f64(1.0);
        }
        // The loop left the clock at t=6.
        f.extractor.set_faces(Vec::new());
        let mut closed = Vec::new();
        for _ in 6..=10 {
            let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
            assert!(r.persistence.error.is_none());
            closed.extend(r.closed);
            f.clock.advance_secs_f64(1.0);
        }

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].label, "Alice");
        assert_eq!(closed[0].duration_seconds, 5.0);
        assert!((closed[0].confidence - 1.0).abs() < 1e-6);

        let summary = f
            .service
            .statistics(Some(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()))
            .await
            .unwrap();
        assert_eq!(summary.people.len(), 1);
        assert_eq!(summary.people[0].appearances, 1);
        assert_eq!(summary.today_count, 1);

        let doc = f.service.export().await.unwrap();
        assert_eq!(doc.statistics[0].total_duration, 5.0);
    }

    #[tokio::test]
    async fn test_unknown_face_not_tracked() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        f.extractor.set_faces(vec![face(&[5.0, 5.0, 5.0])]);
        let r = f.service.recognize(SessionId::DEFAULT, &png_data_url()).await.unwrap();
        assert_eq!(r.faces[0].matched_label, UNKNOWN_LABEL);
        assert!(r.present.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_face_tracked_by_policy() {
        let f = fixture(UnknownPolicy::Track).await;
        f.extractor.set_faces(vec![face(&[5.0, 5.0, 5.0])]);
        let r = f.service.recognize(SessionId::DEFAULT, &png_data_url()).await.unwrap();
        assert_eq!(r.present, vec![UNKNOWN_LABEL.to_string()]);
    }

    #[tokio::test]
    async fn test_enroll_rejections() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let image = png_data_url();

        f.extractor.set_faces(Vec::new());
        assert!(matches!(f.service.enroll("Bob", &image).await, Err(ServiceError::NoFace)));

        f.extractor.set_faces(vec![face(&[0.0]), face(&[1.0])]);
        assert!(matches!(
            f.service.enroll("Bob", &image).await,
            Err(ServiceError::MultipleFaces(2))
        ));

        assert!(matches!(
            f.service.enroll("  ", &image).await,
            Err(ServiceError::InvalidLabel(_))
        ));
        assert!(matches!(
            f.service.enroll("Bob", "not an image").await,
            Err(ServiceError::Frame(_))
        ));

        enroll_alice(&f).await;
        f.extractor.set_faces(vec![face(&[9.0, 9.0, 9.0])]);
        assert!(matches!(
            f.service.enroll("Alice", &image).await,
            Err(ServiceError::Store(StoreError::DuplicateLabel(_)))
        ));
        assert_eq!(f.service.list_faces().await.len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_writes_photo_and_lists_it() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let faces = f.service.list_faces().await;
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, "Alice");
        assert!(faces[0].photo.as_deref().unwrap().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_remove_drops_history_and_open_interval() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let image = png_data_url();

        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
        f.service.remove("Alice").await.unwrap();

        assert!(f.service.list_faces().await.is_empty());
        f.extractor.set_faces(Vec::new());
        f.clock.advance_secs_f64(10.0);
        let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
        assert!(r.closed.is_empty());
        assert!(f.service.export().await.unwrap().statistics.is_empty());

        assert!(matches!(
            f.service.remove("Alice").await,
            Err(ServiceError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_partitioned() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let image = png_data_url();
        let a = f.service.start_session().await;
        let b = f.service.start_session().await;

        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.recognize(a, &image).await.unwrap();
        f.clock.advance_secs_f64(2.0);
        f.service.recognize(a, &image).await.unwrap();

        f.extractor.set_faces(Vec::new());
        let rb = f.service.recognize(b, &image).await.unwrap();
        assert!(rb.present.is_empty());

        let ended = f.service.end_session(a).await.unwrap();
        assert_eq!(ended.closed.len(), 1);
        assert_eq!(ended.closed[0].duration_seconds, 2.0);
        assert_eq!(ended.persistence.persisted, 1);

        assert!(matches!(
            f.service.recognize(a, &image).await,
            Err(ServiceError::Session(SessionError::UnknownSession(_)))
        ));
    }

    #[tokio::test]
    async fn test_sweep_closes_idle_intervals() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.recognize(SessionId::DEFAULT, &png_data_url()).await.unwrap();

        f.clock.advance_secs_f64(1.0);
        assert_eq!(f.service.sweep().await.persisted, 0);
        f.clock.advance_secs_f64(5.0);
        assert_eq!(f.service.sweep().await.persisted, 1);

        let stats = f
            .store
            .call(|b| attendo_core::EventStore::statistics_for(&b.store, "Alice"))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_appearances, 1);
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let health = f.service.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.registered_faces, 1);
        assert_eq!(health.sessions, 1);
        assert_eq!(health.pending_records, 0);
    }

    #[test]
    fn test_photo_path_is_filename_safe() {
        let at = Timestamp::default();
        let id = Uuid::nil();
        let path = photo_path(Path::new("/photos"), "Ann/../Lee", at, id, "jpg");
        assert_eq!(
            path,
            PathBuf::from("/photos/Ann____Lee_19700101_000000_00000000000000000000000000000000.jpg")
        );
    }

    #[tokio::test]
    async fn test_labels_that_sanitize_alike_keep_their_own_photos() {
        let f = fixture(UnknownPolicy::Ignore).await;
        let image = png_data_url();
        f.extractor.set_faces(vec![face(&[0.1, 0.2, 0.3])]);
        f.service.enroll("Ann Lee", &image).await.unwrap();
        f.extractor.set_faces(vec![face(&[0.9, 0.8, 0.7])]);
        f.service.enroll("Ann_Lee", &image).await.unwrap();

        let photos = std::fs::read_dir(f._photos.path()).unwrap().count();
        assert_eq!(photos, 2);

        f.service.remove("Ann_Lee").await.unwrap();
        let faces = f.service.list_faces().await;
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, "Ann Lee");
        assert!(faces[0].photo.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_and_retried() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("attendo.db");
        let f = fixture_on(UnknownPolicy::Ignore, SqliteStore::open(&db).unwrap()).await;
        enroll_alice(&f).await;
        let image = png_data_url();

        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();

        rusqlite::Connection::open(&db)
            .unwrap()
            .execute("DROP TABLE appearance_records", [])
            .unwrap();

        f.extractor.set_faces(Vec::new());
        f.clock.advance_secs_f64(4.0);
        let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
        assert_eq!(r.closed.len(), 1);
        assert_eq!(r.persistence.persisted, 0);
        assert_eq!(r.persistence.pending, 1);
        assert!(r.persistence.error.is_some());
        assert_eq!(f.service.health().await.pending_records, 1);

        // Reopening restores the schema; the queued record goes through next time.
        drop(SqliteStore::open(&db).unwrap());
        f.clock.advance_secs_f64(1.0);
        let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
        assert_eq!(r.persistence.persisted, 1);
        assert_eq!(r.persistence.pending, 0);
        assert!(r.persistence.error.is_none());

        let doc = f.service.export().await.unwrap();
        assert_eq!(doc.appearance_records.len(), 1);
        assert_eq!(doc.statistics[0].total_appearances, 1);
    }

    #[tokio::test]
    async fn test_records_reported_lost_when_store_thread_dies() {
        let f = fixture(UnknownPolicy::Ignore).await;
        enroll_alice(&f).await;
        let image = png_data_url();
        f.extractor.set_faces(vec![face(&ALICE)]);
        f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();

        let crashed = f.store.call(|_| -> () { panic!("store thread crashed") }).await;
        assert!(crashed.is_err());

        f.extractor.set_faces(Vec::new());
        f.clock.advance_secs_f64(4.0);
        let r = f.service.recognize(SessionId::DEFAULT, &image).await.unwrap();
        assert_eq!(r.closed.len(), 1);
        assert_eq!(r.persistence.lost, 1);
        assert_eq!(r.persistence.pending, 0);
        assert!(r.persistence.error.as_deref().unwrap().contains("lost"));
        assert_eq!(f.service.health().await.status, "degraded");
    }

    #[test]
    fn test_validate_label() {
        assert_eq!(validate_label("  Alice ").unwrap(), "Alice");
        assert!(validate_label("").is_err());
        assert!(validate_label("unknown").is_err());
        assert!(validate_label("a\nb").is_err());
        assert!(validate_label(&"x".repeat(101)).is_err());
    }
}
