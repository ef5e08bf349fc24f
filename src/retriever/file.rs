use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::{Exemplar, ExemplarRetriever};
use crate::error::{Result, Text2SqlError};

/// In-memory exemplar pool ranked by word overlap with the question.
pub struct FileExemplarRetriever {
    exemplars: Vec<Exemplar>,
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

impl FileExemplarRetriever {
    pub fn new(exemplars: Vec<Exemplar>) -> Self {
        Self { exemplars }
    }

    /// Loads a JSON array of exemplars.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Text2SqlError::Retriever(format!("cannot read {}: {}", path.display(), e))
        })?;
        let exemplars: Vec<Exemplar> = serde_json::from_str(&raw).map_err(|e| {
            Text2SqlError::Retriever(format!("cannot parse {}: {}", path.display(), e))
        })?;
        info!("Loaded {} exemplars from {}", exemplars.len(), path.display());
        Ok(Self::new(exemplars))
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    fn rank(&self, k: usize, question: &str) -> Vec<Exemplar> {
        let target = tokens(question);
        let mut scored: Vec<(f64, &Exemplar)> = self
            .exemplars
            .iter()
            .map(|e| (jaccard(&target, &tokens(&e.question)), e))
            .collect();
        // sort_by is stable, so ties keep file order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(k).map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl ExemplarRetriever for FileExemplarRetriever {
    async fn fetch(&self, k: usize, question: &str) -> Result<Vec<Exemplar>> {
        Ok(self.rank(k, question))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ex(q: &str) -> Exemplar {
        Exemplar {
            question: q.to_string(),
            sql: format!("-- {}", q),
            evidence: None,
        }
    }

    #[tokio::test]
    async fn test_ranked_by_overlap() {
        let retriever = FileExemplarRetriever::new(vec![
            ex("count the rooms"),
            ex("list all hotels in London"),
            ex("list hotels"),
        ]);
        let got = retriever.fetch(2, "list hotels please").await.unwrap();
        assert_eq!(got[0].question, "list hotels");
        assert_eq!(got[1].question, "list all hotels in London");
    }

    #[tokio::test]
    async fn test_ties_keep_order_and_k_caps() {
        let retriever = FileExemplarRetriever::new(vec![ex("a"), ex("b"), ex("c")]);
        let got = retriever.fetch(2, "zzz").await.unwrap();
        assert_eq!(got.iter().map(|e| e.question.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(retriever.fetch(10, "zzz").await.unwrap().len(), 3);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ex.json");
        std::fs::write(&path, r#"[{"question": "q1", "sql": "SELECT 1", "evidence": "e"}]"#).unwrap();
        let retriever = FileExemplarRetriever::from_path(&path).unwrap();
        assert_eq!(retriever.len(), 1);

        let err = FileExemplarRetriever::from_path(&dir.path().join("missing.json"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "RetrieverError");
    }
}
