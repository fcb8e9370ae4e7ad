use std::fmt;

use serde::Serialize;

/// States of one ingestion.
///
/// The pipeline moves strictly forward through these states. A failure is
/// recorded against the [`IngestStep`] that failed: the transition out of
/// the state the pipeline was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Bytes accepted and persisted; not yet decoded
    Received,
    /// Element stream decoded
    Decoded,
    /// Header attributes attached to the source record
    MetadataAttached,
    /// Pixel data split into frames
    FramesExtracted,
    /// Every frame encoded, stored and registered
    ArtifactsPersisted,
    Complete,
}

impl IngestStage {
    /// All stages in pipeline order.
    pub const ALL: [IngestStage; 6] = [
        IngestStage::Received,
        IngestStage::Decoded,
        IngestStage::MetadataAttached,
        IngestStage::FramesExtracted,
        IngestStage::ArtifactsPersisted,
        IngestStage::Complete,
    ];

    /// The state reached when the transition out of this one succeeds.
    pub fn next(self) -> Option<IngestStage> {
        match self {
            IngestStage::Received => Some(IngestStage::Decoded),
            IngestStage::Decoded => Some(IngestStage::MetadataAttached),
            IngestStage::MetadataAttached => Some(IngestStage::FramesExtracted),
            IngestStage::FramesExtracted => Some(IngestStage::ArtifactsPersisted),
            IngestStage::ArtifactsPersisted => Some(IngestStage::Complete),
            IngestStage::Complete => None,
        }
    }

    /// The work performed when leaving this state.
    pub fn step(self) -> Option<IngestStep> {
        match self {
            IngestStage::Received => Some(IngestStep::Decode),
            IngestStage::Decoded => Some(IngestStep::Metadata),
            IngestStage::MetadataAttached => Some(IngestStep::Extract),
            IngestStage::FramesExtracted => Some(IngestStep::Persist),
            IngestStage::ArtifactsPersisted => Some(IngestStep::Finalize),
            IngestStage::Complete => None,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        self == IngestStage::Complete
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IngestStage::Received => "received",
            IngestStage::Decoded => "decoded",
            IngestStage::MetadataAttached => "metadata_attached",
            IngestStage::FramesExtracted => "frames_extracted",
            IngestStage::ArtifactsPersisted => "artifacts_persisted",
            IngestStage::Complete => "complete",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units of work an ingestion performs; a failure names the one that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStep {
    /// Authorization, storing the source object and registering it
    Intake,
    Decode,
    Metadata,
    /// Locating pixel data and decoding frames
    Extract,
    /// Encoding, registering and storing a frame's artifact
    Persist,
    /// Recording the outcome on the source record
    Finalize,
}

impl IngestStep {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestStep::Intake => "intake",
            IngestStep::Decode => "decode",
            IngestStep::Metadata => "metadata",
            IngestStep::Extract => "extract",
            IngestStep::Persist => "persist",
            IngestStep::Finalize => "finalize",
        }
    }
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
