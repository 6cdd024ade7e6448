#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub directories_entered: usize,
    pub files_queued: usize,
    pub files_transferred: usize,
    pub files_failed: usize,
    pub bytes_transferred: u64,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            directories_entered: self.directories_entered + other.directories_entered,
            files_queued: self.files_queued + other.files_queued,
            files_transferred: self.files_transferred + other.files_transferred,
            files_failed: self.files_failed + other.files_failed,
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "directories entered: {}\n\
            files queued: {}\n\
            files transferred: {}\n\
            files failed: {}\n\
            bytes transferred: {}",
            self.directories_entered,
            self.files_queued,
            self.files_transferred,
            self.files_failed,
            bytesize::ByteSize(self.bytes_transferred)
        )
    }
}

/// Outcome of one top-level transfer, delivered exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Completed(Summary),
    /// `reason` is the first error encountered; the summary still covers everything that ran
    Failed { summary: Summary, reason: String },
}

impl Completion {
    pub fn summary(&self) -> &Summary {
        match self {
            Completion::Completed(summary) | Completion::Failed { summary, .. } => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Completion::Completed(_))
    }

    /// Turn a failure into an error carrying both the reason and the summary.
    pub fn into_result(self) -> anyhow::Result<Summary> {
        match self {
            Completion::Completed(summary) => Ok(summary),
            Completion::Failed { summary, reason } => {
                Err(anyhow::anyhow!("{}\n\n{}", reason, summary))
            }
        }
    }
}
