//! Fact repository: durable things the assistant knows about the user

use chrono::Utc;
use rusqlite::params;

use super::{DbPool, FactStore, connection};
use crate::Result;

/// Facts kept after each append; older ones are dropped
pub const FACT_CAP: usize = 50;

/// Whether `candidate` repeats a stored fact
///
/// Case-insensitive equality, or containment either way when both texts are
/// longer than five characters.
#[must_use]
pub fn is_duplicate_fact(candidate: &str, existing: &str) -> bool {
    let a = candidate.trim().to_lowercase();
    let b = existing.trim().to_lowercase();

    if a == b {
        return true;
    }

    a.chars().count() > 5 && b.chars().count() > 5 && (a.contains(&b) || b.contains(&a))
}

/// SQLite-backed fact store
#[derive(Debug, Clone)]
pub struct FactRepo {
    pool: DbPool,
    cap: usize,
}

impl FactRepo {
    /// Create a fact repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self {
            pool,
            cap: FACT_CAP,
        }
    }

    /// Override the number of facts kept
    #[must_use]
    pub const fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    /// Format facts for the system prompt
    #[must_use]
    pub fn format_for_prompt(facts: &[String]) -> String {
        if facts.is_empty() {
            return String::new();
        }

        let mut output = String::from("Things you know about the user:\n");
        for fact in facts {
            output.push_str("- ");
            output.push_str(fact);
            output.push('\n');
        }
        output
    }
}

impl FactStore for FactRepo {
    fn append_facts(&self, facts: &[String]) -> Result<usize> {
        let mut known = self.list_facts()?;
        let mut conn = connection(&self.pool)?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut added = 0;

        for fact in facts {
            let fact = fact.trim();
            if fact.is_empty() || known.iter().any(|k| is_duplicate_fact(fact, k)) {
                continue;
            }

            tx.execute(
                "INSERT INTO facts (content, created_at) VALUES (?1, ?2)",
                params![fact, now],
            )?;
            known.push(fact.to_string());
            added += 1;
        }

        let cap = i64::try_from(self.cap).unwrap_or(i64::MAX);
        let trimmed = tx.execute(
            "DELETE FROM facts WHERE id NOT IN (SELECT id FROM facts ORDER BY id DESC LIMIT ?1)",
            [cap],
        )?;

        tx.commit()?;

        if added > 0 || trimmed > 0 {
            tracing::debug!(added, trimmed, "facts updated");
        }
        Ok(added)
    }

    fn list_facts(&self) -> Result<Vec<String>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare("SELECT content FROM facts ORDER BY id ASC")?;
        let facts = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(facts)
    }

    fn clear_facts(&self) -> Result<()> {
        connection(&self.pool)?.execute("DELETE FROM facts", [])?;
        tracing::info!("facts cleared");
        Ok(())
    }
}
