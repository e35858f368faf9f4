use crate::config::Config;
use chrono::{Duration, NaiveDateTime};
use image::RgbImage;
use rollcall_core::annotate::draw_face_boxes;
use rollcall_core::preprocess::{self, PreprocessError};
use rollcall_core::{
    BlendedMatcher, CascadeDetector, FaceBox, FaceLocator, FeatureExtractor, Matcher, TextureExtractor,
};
use rollcall_ledger::{
    resolve_checkin, AttendanceRecord, CheckinContext, Gallery, GroupFilter, Ledger, LedgerError, Resolution,
    SkipReason,
};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    InvalidImage(#[from] PreprocessError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
}

/// Matching and timing knobs taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub similarity_threshold: f32,
    pub late_after: Duration,
    pub gallery_cache: bool,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            late_after: Duration::minutes(config.late_after_minutes),
            gallery_cache: config.gallery_cache,
        }
    }
}

/// One face and what it matched, if anything.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub face: FaceBox,
    pub identity_id: Option<String>,
    pub name: Option<String>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFace {
    pub identity_id: String,
    pub reason: SkipReason,
}

/// Summary of one check-in request.
#[derive(Debug, Clone, Serialize)]
pub struct CheckinOutcome {
    pub faces_seen: usize,
    pub recognized: usize,
    pub records: Vec<AttendanceRecord>,
    pub skipped: Vec<SkippedFace>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub identity_id: String,
    pub face: FaceBox,
    pub descriptor_version: String,
    pub gallery_version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Unenrollment {
    pub identity_id: String,
    pub gallery_version: u64,
}

/// The check-in pipeline: decode, locate, extract, match, resolve.
///
/// Faces are matched independently, so one image may record several
/// identities (or the same identity twice, which the ledger collapses).
/// The ledger connection ties an engine to one thread.
pub struct Engine<L = CascadeDetector, X = TextureExtractor, M = BlendedMatcher> {
    ledger: Ledger,
    locator: L,
    extractor: X,
    matcher: M,
    settings: EngineSettings,
    cached: RefCell<Option<Rc<Gallery>>>,
}

impl Engine {
    pub fn new(ledger: Ledger, config: &Config) -> Self {
        Self::with_components(
            ledger,
            CascadeDetector::default(),
            TextureExtractor,
            BlendedMatcher,
            EngineSettings::from(config),
        )
    }
}

impl<L: FaceLocator, X: FeatureExtractor, M: Matcher> Engine<L, X, M> {
    pub fn with_components(ledger: Ledger, locator: L, extractor: X, matcher: M, settings: EngineSettings) -> Self {
        Self {
            ledger,
            locator,
            extractor,
            matcher,
            settings,
            cached: RefCell::new(None),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Current gallery for this extractor's descriptor version. With the cache
    /// enabled it is reloaded only when the ledger's gallery version moves.
    fn gallery(&self) -> Result<Rc<Gallery>, EngineError> {
        if !self.settings.gallery_cache {
            return Ok(Rc::new(self.ledger.load_gallery(self.extractor.version())?));
        }

        let current = self.ledger.gallery_version()?;
        if let Some(gallery) = self.cached.borrow().as_ref() {
            if gallery.version == current {
                return Ok(Rc::clone(gallery));
            }
        }
        let gallery = Rc::new(self.ledger.load_gallery(self.extractor.version())?);
        tracing::debug!(version = gallery.version, entries = gallery.entries.len(), "gallery cache refreshed");
        *self.cached.borrow_mut() = Some(Rc::clone(&gallery));
        Ok(gallery)
    }

    /// Locate faces without matching.
    pub fn detect(&self, image_bytes: &[u8]) -> Result<Vec<FaceBox>, EngineError> {
        let image = preprocess::decode(image_bytes)?;
        Ok(self.locator.detect(&image))
    }

    /// Match every face against the gallery without writing anything.
    pub fn recognize(&self, image_bytes: &[u8]) -> Result<Vec<Recognition>, EngineError> {
        let image = preprocess::decode(image_bytes)?;
        self.recognize_image(&image)
    }

    /// Like [`Engine::recognize`], also returning the decoded frame with
    /// every face boxed: green when matched, red otherwise.
    pub fn recognize_annotated(&self, image_bytes: &[u8]) -> Result<(Vec<Recognition>, RgbImage), EngineError> {
        let mut image = preprocess::decode(image_bytes)?;
        let recognitions = self.recognize_image(&image)?;
        draw_face_boxes(
            &mut image,
            recognitions.iter().map(|r| (&r.face, r.identity_id.is_some())),
        );
        Ok((recognitions, image))
    }

    fn recognize_image(&self, image: &RgbImage) -> Result<Vec<Recognition>, EngineError> {
        let faces = self.locator.detect(image);
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let gallery = self.gallery()?;

        let recognitions = faces
            .into_iter()
            .map(|face| {
                let Some(descriptor) = self.extractor.extract(image, &face) else {
                    tracing::debug!(?face, "no descriptor for face");
                    return Recognition {
                        face,
                        identity_id: None,
                        name: None,
                        similarity: 0.0,
                    };
                };
                let result = self
                    .matcher
                    .compare(&descriptor, &gallery.entries, self.settings.similarity_threshold);
                Recognition {
                    face,
                    identity_id: result.identity_id,
                    name: result.label,
                    similarity: result.similarity,
                }
            })
            .collect();
        Ok(recognitions)
    }

    /// Recognize every face and record attendance for each match.
    pub fn checkin(
        &self,
        image_bytes: &[u8],
        session_id: Option<i64>,
        filter: GroupFilter,
        at: NaiveDateTime,
    ) -> Result<CheckinOutcome, EngineError> {
        let session = match session_id {
            Some(id) => Some(self.ledger.session(id)?.ok_or(LedgerError::UnknownSession(id))?),
            None => None,
        };
        let ctx = CheckinContext::new(session, filter, at).with_late_after(self.settings.late_after);
        ctx.ensure_keyable(self.ledger.scheme())?;

        let image = preprocess::decode(image_bytes)?;
        let faces = self.locator.detect(&image);
        let mut outcome = CheckinOutcome {
            faces_seen: faces.len(),
            recognized: 0,
            records: Vec::new(),
            skipped: Vec::new(),
            message: String::new(),
        };
        if faces.is_empty() {
            outcome.message = "no face detected".to_string();
            tracing::info!("check-in: no face detected");
            return Ok(outcome);
        }

        let gallery = self.gallery()?;
        for face in &faces {
            let Some(descriptor) = self.extractor.extract(&image, face) else {
                tracing::debug!(?face, "check-in: no descriptor for face");
                continue;
            };
            let result = self
                .matcher
                .compare(&descriptor, &gallery.entries, self.settings.similarity_threshold);
            let Some(identity_id) = result.identity_id else {
                tracing::debug!(similarity = result.similarity, "check-in: face not recognized");
                continue;
            };
            let Some(identity) = gallery.identities.get(&identity_id) else {
                tracing::warn!(identity = %identity_id, "matched identity missing from gallery snapshot");
                continue;
            };
            outcome.recognized += 1;

            match resolve_checkin(&self.ledger, identity, &ctx, result.similarity)? {
                Resolution::Recorded(record) => outcome.records.push(record),
                Resolution::Skipped { identity_id, reason } => {
                    outcome.skipped.push(SkippedFace { identity_id, reason })
                }
            }
        }

        outcome.message = format!(
            "{} face(s) seen, {} recognized, {} recorded",
            outcome.faces_seen,
            outcome.recognized,
            outcome.records.len()
        );
        tracing::info!(
            faces = outcome.faces_seen,
            recognized = outcome.recognized,
            recorded = outcome.records.len(),
            "check-in complete"
        );
        Ok(outcome)
    }

    /// Store a descriptor for `identity_id` from the first face in the image,
    /// replacing any earlier enrollment.
    pub fn enroll(&self, identity_id: &str, image_bytes: &[u8]) -> Result<Enrollment, EngineError> {
        if self.ledger.identity(identity_id)?.is_none() {
            return Err(EngineError::UnknownIdentity(identity_id.to_string()));
        }

        let image = preprocess::decode(image_bytes)?;
        let face = self
            .locator
            .detect(&image)
            .into_iter()
            .next()
            .ok_or(EngineError::NoFaceDetected)?;
        let descriptor = self
            .extractor
            .extract(&image, &face)
            .ok_or(EngineError::NoFaceDetected)?;

        let gallery_version = self
            .ledger
            .enroll_descriptor(identity_id, &descriptor, Some(image_bytes))?;
        tracing::info!(identity = identity_id, len = descriptor.len(), "enroll: descriptor stored");

        Ok(Enrollment {
            identity_id: identity_id.to_string(),
            face,
            descriptor_version: descriptor.version,
            gallery_version,
        })
    }

    /// Drop the enrolled descriptor for `identity_id`. The next match runs
    /// against a gallery without it.
    pub fn unenroll(&self, identity_id: &str) -> Result<Unenrollment, EngineError> {
        let gallery_version = self.ledger.remove_descriptor(identity_id).map_err(|e| match e {
            LedgerError::UnknownIdentity(id) => EngineError::UnknownIdentity(id),
            other => EngineError::Ledger(other),
        })?;
        Ok(Unenrollment {
            identity_id: identity_id.to_string(),
            gallery_version,
        })
    }
}
