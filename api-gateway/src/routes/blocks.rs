//! `POST /blocks/publish`: test-ingestion entry point for a single block.
//!
//! Accepts a block in its JSON wire form (see `chain::block`'s
//! `BlockJson` bridge) and hands it to the block processor's queue.
//! Admission is asynchronous: a `202 Accepted` means the block was
//! queued, not that it was confirmed progress.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use chain::{Block, block_processor::AddOrigin};

use crate::state::SharedState;

#[derive(Serialize)]
pub struct PublishResponse {
    pub status: &'static str,
    pub hash: String,
}

/// `POST /blocks/publish`
pub async fn publish(
    State(state): State<SharedState>,
    Json(block): Json<Block>,
) -> Result<(StatusCode, Json<PublishResponse>), (StatusCode, String)> {
    let hash = block.hash();
    if !state.block_processor.add(block, AddOrigin::Live) {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "block processor queue is full".to_string(),
        ));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse { status: "queued", hash: hash.0.to_hex() }),
    ))
}
