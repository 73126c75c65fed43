use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use tracing::{debug, info};

use crate::models::{AskOutcome, AskRequest};
use crate::state::AppState;
use crate::synthesis::SynthesisRequest;
use crate::utils::error::ApiError;

/// Everything before synthesis: rate limits, retrieval, guardrail, packing.
async fn run_pre_synthesis(
    state: &AppState,
    request: &AskRequest,
) -> Result<PreSynthesis, ApiError> {
    request.validate().map_err(ApiError::SchemaInvalid)?;

    let ctx = &request.user_context;
    state.rate_limiters.check_user(&ctx.id)?;
    state.rate_limiters.check_tenant(&ctx.tenant_id)?;

    let retrieval = state
        .retrieval
        .retrieve(&request.query, ctx, request.top_k)
        .await?;

    let decision = state
        .guardrail
        .evaluate(&request.query, &retrieval.results, ctx);

    if !decision.is_answerable {
        info!(
            tenant = %ctx.tenant_id,
            reason = ?decision.reason_code,
            "query judged unanswerable"
        );
        let idk = state.guardrail.build_idk(&decision);
        return Ok(PreSynthesis::Idk { decision, idk });
    }

    let packed = state.packer.pack(&request.query, &retrieval.results);
    debug!(
        packed = packed.chunks.len(),
        tokens = packed.total_tokens,
        "context packed"
    );

    let mut warnings = retrieval.warnings;
    warnings.extend(
        packed
            .trace
            .dropped_reasons
            .iter()
            .map(|d| format!("dropped {}: {}", d.id, d.reason)),
    );

    Ok(PreSynthesis::Ready(Box::new(SynthesisRequest {
        query: request.query.clone(),
        documents: packed.chunks,
        user_context: ctx.clone(),
        include_citations: request.include_citations,
        answer_format: request.answer_format,
        max_tokens: request.max_tokens,
        guardrail: Some(decision),
        context_truncated: packed.truncated,
        warnings,
    })))
}

enum PreSynthesis {
    Idk {
        decision: crate::models::GuardrailDecision,
        idk: crate::models::IdkResponse,
    },
    Ready(Box<SynthesisRequest>),
}

/// POST /ask: non-streaming JSON answer or structured refusal.
pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskOutcome>, ApiError> {
    match run_pre_synthesis(&state, &request).await? {
        PreSynthesis::Idk { idk, .. } => Ok(Json(AskOutcome::Idk(idk))),
        PreSynthesis::Ready(synthesis_request) => {
            let answer = state.synthesis.synthesize(*synthesis_request).await?;
            Ok(Json(AskOutcome::Answer(answer)))
        }
    }
}

/// POST /ask/stream: SSE stream of typed synthesis events.
pub async fn ask_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let mut rx = match run_pre_synthesis(&state, &request).await? {
        PreSynthesis::Idk { decision, idk } => state.synthesis.stream_idk(decision, idk),
        PreSynthesis::Ready(synthesis_request) => {
            state.synthesis.synthesize_stream(*synthesis_request)
        }
    };

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default()
                .event(event.name())
                .data(event.data().to_string()));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
