use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```sql\s*(.*?)\s*```").unwrap());

/// Pulls the first ```sql fenced block out of a model reply.
/// Replies without a fence come back unchanged.
pub fn extract_sql(content: &str) -> String {
    let fenced = SQL_FENCE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    match fenced {
        Some(sql) => {
            debug!("Extracted SQL from fenced block");
            sql
        }
        None => content.to_string(),
    }
}

/// Turns a raw completion into a runnable query. When the prompt ends in
/// `SELECT` and the model only continued the statement, the keyword is restored.
pub fn complete_sql(reply: &str, prompt: &str) -> String {
    let extracted = extract_sql(reply);
    let sql = extracted
        .trim()
        .trim_start_matches("```sql")
        .trim_end_matches("```")
        .trim();

    let leading = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let is_statement = leading == "SELECT" || leading == "WITH";

    if !sql.is_empty() && !is_statement && prompt.trim_end().ends_with("SELECT") {
        format!("SELECT {}", sql)
    } else {
        sql.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block() {
        let reply = "Here you go:\n```sql\nSELECT * FROM hotel;\n```\nEnjoy.";
        assert_eq!(extract_sql(reply), "SELECT * FROM hotel;");
    }

    #[test]
    fn test_uppercase_tag_and_multiline() {
        let reply = "```SQL\nSELECT a\nFROM b\n```";
        assert_eq!(extract_sql(reply), "SELECT a\nFROM b");
    }

    #[test]
    fn test_first_block_wins() {
        let reply = "```sql\nSELECT 1\n```\nor\n```sql\nSELECT 2\n```";
        assert_eq!(extract_sql(reply), "SELECT 1");
    }

    #[test]
    fn test_fence_pattern_compiles() {
        assert!(SQL_FENCE.is_match("```sql SELECT 1 ```"));
    }

    #[test]
    fn test_unfenced_passthrough() {
        assert_eq!(extract_sql("SELECT 1"), "SELECT 1");
        assert_eq!(extract_sql("```\nSELECT 1\n```"), "```\nSELECT 1\n```");
    }

    #[test]
    fn test_complete_sql_restores_keyword() {
        assert_eq!(complete_sql(" hotelname FROM hotel", "...\nA: SELECT"), "SELECT hotelname FROM hotel");
        assert_eq!(complete_sql("SELECT 1", "...\nA: SELECT"), "SELECT 1");
        assert_eq!(complete_sql("with t as (select 1) select * from t", "SELECT"), "with t as (select 1) select * from t");
        assert_eq!(complete_sql("hotelname FROM hotel", "no keyword"), "hotelname FROM hotel");
        // icl prompts open a fence the model then closes
        assert_eq!(complete_sql("SELECT 1\n```", "```sql"), "SELECT 1");
    }
}
