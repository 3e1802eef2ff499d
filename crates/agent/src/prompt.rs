//! Prompt assembly for the completion service.
//!
//! The wire protocol is plain chat messages: a system instruction with
//! the domain description and schema, the prior conversation turns,
//! the current question, and the running transcript of this run.

use serde::Serialize;

use autoquery_core::PromptContext;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self { role: "system", content }
    }

    fn user(content: String) -> Self {
        Self { role: "user", content }
    }

    fn assistant(content: String) -> Self {
        Self { role: "assistant", content }
    }
}

const DOMAIN_INSTRUCTION: &str = "\
You are an expert automotive sales analyst with deep SQL knowledge. You help \
business users get insights from an automotive sales database by converting \
their questions into SQL queries.

The database contains six tables:
1. vehicles - vehicle inventory (make, model, year, body_type, msrp)
2. dealerships - dealership locations (name, city, state)
3. customers - customer records (first_name, registration_date)
4. sales_transactions - completed sales (sale_date, sale_price, foreign keys)
5. marketing_campaigns - campaign metadata (dates, budget)
6. competitor_sales - competitor unit sales by month and region

SQL dialect: SQLite.
- Dates are TEXT in 'YYYY-MM-DD' form; use strftime('%Y', sale_date) for year
  extraction and plain string comparison for date ranges.
- Use SUM/AVG/COUNT for metrics, ORDER BY with LIMIT for top/bottom queries,
  and join tables through their foreign keys.
- sale_price is the final transaction price and may be below msrp.
- All monetary values are in USD. Data covers January 2023 - October 2024.

Respond in exactly one of two ways:
- To run a query, write a line starting with `SQL:` followed by one read-only
  SELECT statement. One query per response.
- To answer the user, write a line starting with `ANSWER:` followed by the
  final answer grounded in the query results you have seen.

Queries that fail will be shown to you verbatim so you can correct them. If \
the question needs no data (a greeting, or something outside this dataset), \
answer directly.";

/// Renders the full message sequence for one `propose` call.
pub fn build_messages(context: &PromptContext<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    messages.push(ChatMessage::system(format!(
        "{DOMAIN_INSTRUCTION}\n\nCurrent schema:\n{}",
        context.schema.summary()
    )));

    for turn in context.history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }

    messages.push(ChatMessage::user(context.question.to_string()));

    for entry in context.transcript {
        messages.push(ChatMessage::assistant(format!("SQL: {}", entry.step.statement)));
        messages.push(ChatMessage::user(format!("Result:\n{}", entry.observation)));
    }

    for correction in context.corrections {
        messages.push(ChatMessage::user(correction.clone()));
    }

    messages
}
