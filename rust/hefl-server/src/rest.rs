//! A HTTP API for the contributors of a deployment.
//!
//! All payloads are bincode encoded.
//!
//! | route             | method | body                  | reply                                   |
//! |-------------------|--------|-----------------------|-----------------------------------------|
//! | `/params`         | GET    |                       | [`RoundParameters`]                     |
//! | `/phase`          | GET    |                       | [`PhaseName`]                           |
//! | `/model`          | GET    |                       | [`GlobalModel`] or `204`                |
//! | `/evaluation`     | GET    |                       | [`EvaluationSummary`] or `204`          |
//! | `/submit`         | POST   | [`Submission`]        | `200`, or `400` with the rejection      |
//! | `/evaluate`       | POST   | [`EvaluationReport`]  | `200`, or `400` with the rejection      |
//!
//! [`RoundParameters`]: hefl_core::RoundParameters
//! [`PhaseName`]: hefl_core::PhaseName
//! [`GlobalModel`]: hefl_core::GlobalModel
//! [`EvaluationSummary`]: hefl_core::EvaluationSummary

use std::convert::Infallible;

use bytes::Bytes;
use hefl_core::{EvaluationReport, Submission};
use serde::Serialize;
use tracing::{error, info_span, warn};
use warp::{
    http::{Response, StatusCode},
    hyper::Body,
    Filter,
};

use crate::{
    settings::ApiSettings,
    state_machine::{
        events::{EvaluationUpdate, EventSubscriber, ModelUpdate},
        requests::{RequestError, RequestSender, StateMachineRequest},
    },
};

/// Starts a HTTP server at the given address, listening to GET requests for the state of the
/// deployment and POST requests containing submissions and evaluation reports.
pub async fn serve(
    api_settings: ApiSettings,
    events: EventSubscriber,
    request_tx: RequestSender,
) {
    warp::serve(routes(events, request_tx))
        .run(api_settings.bind_address)
        .await;
}

/// Builds the routes of the HTTP API.
pub fn routes(
    events: EventSubscriber,
    request_tx: RequestSender,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let submit = warp::path!("submit")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_request_sender(request_tx.clone()))
        .and_then(handle_submit);

    let evaluate = warp::path!("evaluate")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_request_sender(request_tx))
        .and_then(handle_evaluate);

    let round_params = warp::path!("params")
        .and(warp::get())
        .and(with_events(events.clone()))
        .and_then(handle_params);

    let phase = warp::path!("phase")
        .and(warp::get())
        .and(with_events(events.clone()))
        .and_then(handle_phase);

    let model = warp::path!("model")
        .and(warp::get())
        .and(with_events(events.clone()))
        .and_then(handle_model);

    let evaluation = warp::path!("evaluation")
        .and(warp::get())
        .and(with_events(events))
        .and_then(handle_evaluation);

    submit
        .or(evaluate)
        .or(round_params)
        .or(phase)
        .or(model)
        .or(evaluation)
        .recover(handle_reject)
        .with(warp::log("http"))
}

/// Handles and responds to a submission of encrypted parameters.
async fn handle_submit(
    body: Bytes,
    request_tx: RequestSender,
) -> Result<Response<Body>, Infallible> {
    let submission: Submission = match bincode::deserialize(&body) {
        Ok(submission) => submission,
        Err(err) => return Ok(bad_request(format!("invalid submission: {}", err))),
    };
    let span = info_span!(
        "submit",
        contributor = %submission.contributor,
        round_id = submission.round_id
    );
    Ok(forward(request_tx, submission.into(), span).await)
}

/// Handles and responds to an evaluation report.
async fn handle_evaluate(
    body: Bytes,
    request_tx: RequestSender,
) -> Result<Response<Body>, Infallible> {
    let report: EvaluationReport = match bincode::deserialize(&body) {
        Ok(report) => report,
        Err(err) => return Ok(bad_request(format!("invalid evaluation report: {}", err))),
    };
    let span = info_span!(
        "evaluate",
        contributor = %report.contributor,
        round_id = report.round_id
    );
    Ok(forward(request_tx, report.into(), span).await)
}

/// Forwards a request to the state machine and translates its response.
async fn forward(
    request_tx: RequestSender,
    req: StateMachineRequest,
    span: tracing::Span,
) -> Response<Body> {
    match request_tx.request(req, span).await {
        Ok(()) => reply(StatusCode::OK, Body::empty()),
        Err(err @ RequestError::InternalError(_)) => {
            error!("failed to handle request: {}", err);
            reply(StatusCode::INTERNAL_SERVER_ERROR, Body::empty())
        }
        Err(err) => {
            warn!("request rejected: {}", err);
            bad_request(err.to_string())
        }
    }
}

/// Handles and responds to a request for the round parameters.
async fn handle_params(events: EventSubscriber) -> Result<Response<Body>, Infallible> {
    Ok(encoded(&events.params_listener().get_latest().event))
}

/// Handles and responds to a request for the current phase.
async fn handle_phase(events: EventSubscriber) -> Result<Response<Body>, Infallible> {
    Ok(encoded(&events.phase_listener().get_latest().event))
}

/// Handles and responds to a request for the global model.
async fn handle_model(events: EventSubscriber) -> Result<Response<Body>, Infallible> {
    Ok(match events.model_listener().get_latest().event {
        ModelUpdate::New(model) => encoded(model.as_ref()),
        ModelUpdate::Invalidate => reply(StatusCode::NO_CONTENT, Body::empty()),
    })
}

/// Handles and responds to a request for the latest evaluation summary.
async fn handle_evaluation(events: EventSubscriber) -> Result<Response<Body>, Infallible> {
    Ok(match events.evaluation_listener().get_latest().event {
        EvaluationUpdate::New(summary) => encoded(summary.as_ref()),
        EvaluationUpdate::Invalidate => reply(StatusCode::NO_CONTENT, Body::empty()),
    })
}

fn encoded<T: Serialize + ?Sized>(value: &T) -> Response<Body> {
    match bincode::serialize(value) {
        Ok(bytes) => {
            let mut response = reply(StatusCode::OK, Body::from(bytes));
            response.headers_mut().insert(
                warp::http::header::CONTENT_TYPE,
                warp::http::HeaderValue::from_static("application/octet-stream"),
            );
            response
        }
        Err(err) => {
            error!("failed to serialize a reply: {}", err);
            reply(StatusCode::INTERNAL_SERVER_ERROR, Body::empty())
        }
    }
}

fn bad_request(reason: String) -> Response<Body> {
    reply(StatusCode::BAD_REQUEST, Body::from(reason))
}

fn reply(status: StatusCode, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Converts a request sender into a `warp` filter.
fn with_request_sender(
    request_tx: RequestSender,
) -> impl Filter<Extract = (RequestSender,), Error = Infallible> + Clone {
    warp::any().map(move || request_tx.clone())
}

/// Converts an event subscriber into a `warp` filter.
fn with_events(
    events: EventSubscriber,
) -> impl Filter<Extract = (EventSubscriber,), Error = Infallible> + Clone {
    warp::any().map(move || events.clone())
}

/// Handles `warp` rejections of bad requests.
async fn handle_reject(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    // reply with empty body; the status code is the interesting part
    Ok(warp::reply::with_status(Vec::new(), code))
}
