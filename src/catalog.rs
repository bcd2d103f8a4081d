//! Problem catalog collaborator.
//!
//! Problems are loaded once per process from a JSON array of records and are
//! immutable afterwards.

use crate::config::types::{Result, TutorboxError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    pub expected_output: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub title: String,
    #[serde(alias = "description")]
    pub prompt: String,
    #[serde(default)]
    pub difficulty: String,
    /// Grounding for the tutor only; never included in a response
    #[serde(alias = "solution")]
    pub reference_solution: String,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

impl Problem {
    pub fn first_case(&self) -> Option<&TestCase> {
        self.cases.first()
    }
}

/// Lookup contract for problem records
pub trait ProblemCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<Problem>>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory catalog
#[derive(Debug, Default)]
pub struct StaticCatalog {
    problems: HashMap<String, Arc<Problem>>,
}

impl StaticCatalog {
    pub fn from_problems(problems: Vec<Problem>) -> Result<Self> {
        let mut map = HashMap::with_capacity(problems.len());
        for problem in problems {
            if problem.id.trim().is_empty() {
                return Err(TutorboxError::Config(
                    "catalog contains a problem without an id".to_string(),
                ));
            }
            let id = problem.id.clone();
            if map.insert(id.clone(), Arc::new(problem)).is_some() {
                return Err(TutorboxError::Config(format!(
                    "duplicate problem id in catalog: {}",
                    id
                )));
            }
        }
        Ok(Self { problems: map })
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TutorboxError::Config(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let problems: Vec<Problem> = serde_json::from_str(&content).map_err(|e| {
            TutorboxError::Config(format!("invalid catalog {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_problems(problems)?;
        log::info!(
            "Loaded {} problem(s) from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }
}

impl ProblemCatalog for StaticCatalog {
    fn get(&self, id: &str) -> Option<Arc<Problem>> {
        self.problems.get(id).cloned()
    }

    fn len(&self) -> usize {
        self.problems.len()
    }
}
