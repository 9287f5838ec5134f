use crate::*;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use surfline_signal::negotiation::{NegotiationError, RetryPolicy, SdpExchange, SdpPayload, SdpType};

// ── Stub rendezvous ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Rendezvous {
    /// (session, slot, handshake) → payload.
    slots: Mutex<HashMap<(String, String, String), SdpPayload>>,
    /// Posts still to be refused with 409 before any is accepted.
    contended_posts: AtomicU32,
}

type Shared = Arc<Rendezvous>;

async fn fetch(
    State(state): State<Shared>,
    Path((session, slot)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let handshake = query.get("handshake_id").cloned().unwrap_or_default();
    let slots = state.slots.lock().unwrap();
    match slots.get(&(session, slot, handshake)) {
        Some(payload) => Json(payload.clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn publish(
    State(state): State<Shared>,
    Path((session, slot)): Path<(String, String)>,
    Json(payload): Json<SdpPayload>,
) -> Response {
    let refused = state
        .contended_posts
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if refused {
        return (StatusCode::CONFLICT, [(header::RETRY_AFTER, "0.01")]).into_response();
    }
    let key = (session, slot, payload.handshake_id.clone());
    state.slots.lock().unwrap().insert(key, payload);
    StatusCode::OK.into_response()
}

async fn spawn_rendezvous(contended_posts: u32) -> Result<String> {
    let state = Arc::new(Rendezvous {
        contended_posts: AtomicU32::new(contended_posts),
        ..Rendezvous::default()
    });
    let router = Router::new()
        .route("/sessions/{session}/webrtc/{slot}", get(fetch).post(publish))
        .with_state(state);
    serve(router).await
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        default_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    }
}

fn payload(sdp_type: SdpType, from: &str, to: &str) -> SdpPayload {
    SdpPayload {
        sdp: format!("v=0\r\no={from} 1 1 IN IP4 127.0.0.1\r\n"),
        sdp_type,
        handshake_id: "hs-42".into(),
        from_peer: from.into(),
        to_peer: to.into(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Offer and answer meet through the rendezvous, with the answerer polling
/// before the offer exists and the first post hitting a contended slot.
#[tokio::test]
async fn test_offer_answer_rendezvous() -> Result<()> {
    let base = spawn_rendezvous(1).await?;
    let offer_url = format!("{base}/sessions/s-1/webrtc/offer");
    let answer_url = format!("{base}/sessions/s-1/webrtc/answer");
    let params: &[(&str, &str)] = &[("handshake_id", "hs-42")];

    let answerer = {
        let offer_url = offer_url.clone();
        let answer_url = answer_url.clone();
        tokio::spawn(async move {
            let exchange = SdpExchange::new(policy());
            let params: &[(&str, &str)] = &[("handshake_id", "hs-42")];
            let offer = exchange
                .wait_for_sdp(&offer_url, Some(params), Duration::from_millis(20), EVENT_TIMEOUT)
                .await?;
            let answer = payload(SdpType::Answer, &offer.to_peer, &offer.from_peer);
            exchange.post_sdp(&answer_url, &answer, Some(params)).await?;
            Ok::<SdpPayload, NegotiationError>(offer)
        })
    };

    let exchange = SdpExchange::new(policy());
    assert!(exchange.poll_sdp(&offer_url, Some(params)).await?.is_none());

    let offer = payload(SdpType::Offer, "host", "viewer-1");
    exchange.post_sdp(&offer_url, &offer, Some(params)).await?;

    let answer = exchange
        .wait_for_sdp(&answer_url, Some(params), Duration::from_millis(20), EVENT_TIMEOUT)
        .await?;
    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert_eq!(answer.from_peer, "viewer-1");
    assert_eq!(answer.to_peer, "host");

    let seen_by_answerer = answerer.await.context("answerer panicked")??;
    assert_eq!(seen_by_answerer, offer);
    Ok(())
}

/// Slots are scoped by handshake: another handshake sees nothing.
#[tokio::test]
async fn test_handshakes_are_isolated() -> Result<()> {
    let base = spawn_rendezvous(0).await?;
    let url = format!("{base}/sessions/s-1/webrtc/offer");
    let exchange = SdpExchange::new(policy());

    exchange
        .post_sdp(&url, &payload(SdpType::Offer, "host", "viewer-1"), None)
        .await?;
    let other = exchange
        .poll_sdp(&url, Some(&[("handshake_id", "hs-other")]))
        .await?;
    assert!(other.is_none());
    let mine = exchange
        .poll_sdp(&url, Some(&[("handshake_id", "hs-42")]))
        .await?;
    assert_eq!(mine.map(|p| p.from_peer), Some("host".to_string()));
    Ok(())
}

/// Nobody posts: the wait gives up at its deadline.
#[tokio::test]
async fn test_wait_times_out() -> Result<()> {
    let base = spawn_rendezvous(0).await?;
    let url = format!("{base}/sessions/s-9/webrtc/answer");
    let exchange = SdpExchange::new(policy());

    let deadline = Duration::from_millis(150);
    match exchange
        .wait_for_sdp(&url, None, Duration::from_millis(20), deadline)
        .await
    {
        Err(NegotiationError::Timeout(after)) => assert_eq!(after, deadline),
        other => panic!("expected timeout, got {other:?}"),
    }
    Ok(())
}

/// A slot that stays contended exhausts the retry budget.
#[tokio::test]
async fn test_contention_exhausts_retries() -> Result<()> {
    let base = spawn_rendezvous(u32::MAX).await?;
    let url = format!("{base}/sessions/s-1/webrtc/offer");
    let exchange = SdpExchange::new(policy());

    match exchange
        .post_sdp(&url, &payload(SdpType::Offer, "host", "viewer-1"), None)
        .await
    {
        Err(NegotiationError::RetriesExhausted { attempts }) => assert_eq!(attempts, 5),
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    Ok(())
}
