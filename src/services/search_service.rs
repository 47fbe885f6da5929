use crate::data::Store;
use crate::error::AppError;
use crate::models::media::MediaKind;
use crate::models::search::{SearchHit, SearchOptions, SearchRequest, SortField, SortOrder};

const MIN_TERM_CHARS: usize = 3;
const MAX_LIMIT: u32 = 200;

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Validates a client request into repository options.
pub fn parse_request(request: &SearchRequest) -> Result<SearchOptions, AppError> {
    let defaults = SearchOptions::default();

    let sort_field = match non_empty(&request.sort.field) {
        Some(field) => field.parse::<SortField>().map_err(AppError::InvalidInput)?,
        None => defaults.sort_field,
    };
    let sort_order = match non_empty(&request.sort.order) {
        Some(order) => order.parse::<SortOrder>().map_err(AppError::InvalidInput)?,
        None => defaults.sort_order,
    };
    let kind = match non_empty(&request.media) {
        Some(kind) => Some(kind.parse::<MediaKind>().map_err(AppError::InvalidInput)?),
        None => None,
    };
    if let (Some(from), Some(to)) = (request.date_from, request.date_to) {
        if from > to {
            return Err(AppError::InvalidInput(
                "date_from is after date_to".to_string(),
            ));
        }
    }

    let limit = match request.limit {
        0 => defaults.limit,
        limit => limit.min(MAX_LIMIT),
    };

    Ok(SearchOptions {
        body: non_empty(&request.body),
        directory: non_empty(&request.directory).map(|d| d.to_lowercase()),
        kind,
        date_from: request.date_from,
        date_to: request.date_to,
        limit,
        offset: request.offset,
        sort_field,
        sort_order,
    })
}

/// FTS5 expression matching any term of `body` long enough for the trigram
/// index. `None` when no term qualifies.
pub fn fts_query(body: &str) -> Option<String> {
    let terms: Vec<String> = body
        .split_whitespace()
        .filter(|term| term.chars().count() >= MIN_TERM_CHARS)
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

pub fn search(store: &Store, options: &SearchOptions) -> Result<Vec<SearchHit>, AppError> {
    match options.body.as_deref() {
        Some(body) => match fts_query(body) {
            Some(query) => store.search_medias(options, Some(&query)),
            None => Ok(Vec::new()),
        },
        None => store.search_medias(options, None),
    }
}
