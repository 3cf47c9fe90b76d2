// src/schema/relevance.rs
// Relevance resolution: which part of the schema does this question need?
// Strategy (a) is the similarity index; strategy (b) is keyword matching
// for simple questions and model-ranked table selection otherwise. Each
// layer degrades to the next, ending at the full schema.

use tracing::warn;

use super::SchemaProvider;
use crate::agent::state::Complexity;
use crate::llm::parse::parse_json_response;
use crate::llm::TextModel;

impl SchemaProvider {
    /// Schema text relevant to the question.
    ///
    /// Never fails: every fallible path falls through to a broader subset,
    /// ending at the full, unfiltered schema.
    pub async fn relevant_schema(
        &self,
        question: &str,
        complexity: Complexity,
        model: &dyn TextModel,
    ) -> String {
        if let Some(index) = &self.index {
            match index.search(question).await {
                Ok(fragments) if !fragments.is_empty() => {
                    return fragments.join("\n");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("schema index unavailable, falling back: {e}");
                }
            }
        }

        match complexity {
            Complexity::Simple => {
                let matched = self.keyword_match(question);
                if matched.is_empty() {
                    self.model_ranked(question, model).await
                } else {
                    self.schema_subset(&matched)
                }
            }
            _ => self.model_ranked(question, model).await,
        }
    }

    /// Table names mentioned verbatim in the question.
    fn keyword_match(&self, question: &str) -> Vec<String> {
        let lower_q = question.to_lowercase();
        self.table_names()
            .iter()
            .filter(|t| lower_q.contains(&t.to_lowercase()))
            .cloned()
            .collect()
    }

    /// Ask the model which tables matter. Malformed output or an empty
    /// selection falls back to the full schema rather than failing.
    async fn model_ranked(&self, question: &str, model: &dyn TextModel) -> String {
        let prompt = format!(
            r#"Given the following list of table names, identify which tables are likely relevant to answer the question.

Table Names: {}

Question: "{}"

Return a JSON list of relevant table names only. Example: ["TableA", "TableB"]"#,
            self.table_names().join(", "),
            question
        );

        let response = match model.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("table ranking failed, using full schema: {e}");
                return self.full_schema().to_string();
            }
        };

        match parse_json_response::<Vec<String>>(&response) {
            Ok(ranked) => {
                let valid: Vec<String> = ranked
                    .into_iter()
                    .filter(|name| {
                        self.table_names().iter().any(|t| t.eq_ignore_ascii_case(name))
                    })
                    .collect();
                if valid.is_empty() {
                    self.full_schema().to_string()
                } else {
                    self.schema_subset(&valid)
                }
            }
            Err(e) => {
                warn!("could not parse ranked tables, using full schema: {e}");
                self.full_schema().to_string()
            }
        }
    }
}
