use serde_json::Value;
use tracing::debug;

use crate::api::{Query, Transport};
use crate::error::EngineError;

/// How one signal obtains its raw data from the API.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchSpec {
    /// One request; the payload is passed through as-is.
    Single(Query),
    /// Two requests joined concurrently; both must succeed.
    Paired(Query, Query),
    /// A continuation-linked listing reduced to its total item count.
    /// `list` names the item array under the response's `query` object.
    Paginated { query: Query, list: &'static str },
}

/// Raw material handed to a signal's reduction.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Pair(Value, Value),
    Count(u64),
}

/// Drive one fetch plan to completion.
///
/// `max_pages` bounds continuation chains; a chain that has not terminated
/// by then fails with a protocol error instead of looping forever.
pub async fn execute_plan(
    transport: &dyn Transport,
    spec: &FetchSpec,
    max_pages: u32,
) -> Result<Payload, EngineError> {
    match spec {
        FetchSpec::Single(query) => {
            let data = transport.get_json(&with_fresh_continue(query)).await?;
            Ok(Payload::Json(data))
        }
        FetchSpec::Paired(first, second) => {
            // Both requests in flight at once; completion order is irrelevant
            // and either failure fails the pair.
            let first = with_fresh_continue(first);
            let second = with_fresh_continue(second);
            let (a, b) = tokio::join!(
                transport.get_json(&first),
                transport.get_json(&second),
            );
            Ok(Payload::Pair(a?, b?))
        }
        FetchSpec::Paginated { query, list } => {
            let count = walk_pages(transport, query, list, max_pages).await?;
            Ok(Payload::Count(count))
        }
    }
}

/// Every request starts a continuation chain with an empty `continue`.
fn with_fresh_continue(base: &Query) -> Query {
    let mut query = base.clone();
    query.push(("continue".into(), String::new()));
    query
}

/// Walk a continuation chain sequentially, counting items per page.
///
/// Each request after the first echoes the server's `continue` object
/// verbatim; the chain ends when a response carries no `continue`. Requests
/// are strictly sequential: page N+1 depends on page N's token.
async fn walk_pages(
    transport: &dyn Transport,
    base: &Query,
    list: &'static str,
    max_pages: u32,
) -> Result<u64, EngineError> {
    let mut count: u64 = 0;
    let mut continuation: Option<serde_json::Map<String, Value>> = None;

    for page in 0..max_pages {
        let query = match &continuation {
            None => with_fresh_continue(base),
            Some(token) => {
                let mut query = base.clone();
                for (key, value) in token {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    query.push((key.clone(), value));
                }
                query
            }
        };

        let data = transport.get_json(&query).await?;

        let items = data
            .get("query")
            .and_then(|q| q.get(list))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EngineError::Protocol(format!("page {page} is missing the `query.{list}` array"))
            })?;
        count += items.len() as u64;

        match data.get("continue") {
            None => {
                debug!("Listing {list} exhausted after {} page(s), {count} items", page + 1);
                return Ok(count);
            }
            Some(Value::Object(token)) => continuation = Some(token.clone()),
            Some(other) => {
                return Err(EngineError::Protocol(format!(
                    "continuation token is not an object: {other}"
                )));
            }
        }
    }

    Err(EngineError::Protocol(format!(
        "continuation chain still unfinished after {max_pages} pages"
    )))
}
