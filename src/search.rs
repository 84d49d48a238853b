//! Interactive similarity search for the CLI.

use anyhow::Result;

use crate::evidence::EvidenceAssembler;

/// Run a search and print both the raw hits and the incidents they resolve
/// to. Scores are cosine similarity, higher is better.
pub async fn run_search(
    assembler: &EvidenceAssembler,
    query: &str,
    min_score: f32,
    limit: usize,
) -> Result<()> {
    let hits = assembler.vector_search(query, min_score).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Matches:");
    for (i, hit) in hits.iter().take(limit).enumerate() {
        println!(
            "{}. [{:.2}] {} {}",
            i + 1,
            hit.score,
            hit.source_type.as_str(),
            hit.source_id
        );
        println!(
            "    excerpt: \"{}\"",
            truncate_chars(hit.chunk_text.replace('\n', " ").trim(), 120)
        );
    }
    println!();

    let mut candidate_ids = assembler.candidate_incident_ids(&hits).await?;
    candidate_ids.truncate(limit);

    println!("Incidents:");
    for &id in &candidate_ids {
        println!("  {}", id);
    }

    Ok(())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 5), "abcde...");
    }
}
