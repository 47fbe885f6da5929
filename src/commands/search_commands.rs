use std::time::Instant;

use serde::Serialize;

use crate::error::AppError;
use crate::models::search::{SearchHit, SearchRequest};
use crate::services::search_service;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub medias: Vec<SearchHit>,
    pub took_ms: u128,
}

pub fn search(state: &AppState, request: &SearchRequest) -> Result<SearchResponse, AppError> {
    let start = Instant::now();
    let options = search_service::parse_request(request)?;
    let medias = search_service::search(&state.store, &options)?;
    Ok(SearchResponse {
        medias,
        took_ms: start.elapsed().as_millis(),
    })
}
