use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Labels file {0} contains no labels")]
    Empty(String),
}

/// Class-index to class-name table of the detector.
#[derive(Debug, Clone, Default)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        let path = labels_cfg.get_path();
        let labels = load_labels(&path)?;
        if labels.is_empty() {
            return Err(LabelsError::Empty(path.display().to_string()));
        }

        tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
        Ok(labels)
    }

    pub fn name(&self, class_id: usize) -> String {
        match self.names.get(class_id) {
            Some(label) => label.clone(),
            None => format!("Unknown class {}", class_id),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn load_labels(filepath: &Path) -> Result<ClassLabels, LabelsError> {
    let file = File::open(filepath)?;
    parse_labels(io::BufReader::new(file))
}

// Lines may carry trailing colour columns (`person,255,0,0`); only the name is kept.
pub fn parse_labels(reader: impl BufRead) -> Result<ClassLabels, LabelsError> {
    let mut names = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        names.push(label.to_string());
    }

    Ok(ClassLabels { names })
}
