use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("experiment file not found: {}", .0.display())]
    MissingExperiment(PathBuf),
    #[error("invalid experiment {}: {}", .path.display(), .problems.join("; "))]
    InvalidExperiment {
        path: PathBuf,
        problems: Vec<String>,
    },
    #[error("combination is missing parameter {0}")]
    MissingParameter(String),
    #[error("failed to parse experiment {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to initialize result file {}: {source}", .path.display())]
    ResultFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingExperiment(_)
                | Error::InvalidExperiment { .. }
                | Error::MissingParameter(_)
                | Error::Yaml { .. }
        )
    }
}
