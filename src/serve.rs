//! Long-running mode: reads requests from stdin, one per line, until EOF or
//! ctrl-c. The cache, quota and maintenance task live for the whole session.
//!
//! Line forms:
//!   `rs429358 rs7412`         lookups for the default requester
//!   `@alice rs429358`         lookups recorded under `alice`
//!   `/history`, `@alice /history`

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use common::RequesterId;
use resolver::VariantService;

use crate::render;

#[derive(Debug, PartialEq)]
pub enum Request {
    Lookup {
        requester: RequesterId,
        rsids: Vec<String>,
    },
    History {
        requester: RequesterId,
    },
}

pub fn parse_line(line: &str, default_requester: &RequesterId) -> Option<Request> {
    let mut words = line.split_whitespace().peekable();
    let requester = match words.peek() {
        Some(w) if w.len() > 1 && w.starts_with('@') => {
            let name = w.trim_start_matches('@').to_string();
            words.next();
            RequesterId::new(name)
        }
        Some(_) => default_requester.clone(),
        None => return None,
    };

    let rest: Vec<String> = words.map(str::to_string).collect();
    match rest.first().map(String::as_str) {
        None => None,
        Some("/history") => Some(Request::History { requester }),
        Some(_) => Some(Request::Lookup {
            requester,
            rsids: rest,
        }),
    }
}

pub async fn run(
    service: &VariantService,
    default_requester: RequesterId,
    json: bool,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    info!("Reading rsIDs from stdin (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping");
                shutdown.cancel();
                break;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    let Some(request) = parse_line(&line, &default_requester) else {
                        continue;
                    };
                    let service = service.clone();
                    let cancel = shutdown.child_token();
                    tasks.spawn(async move { handle(&service, request, json, timeout, &cancel).await });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Request task failed: {}", e);
        }
    }
}

async fn handle(
    service: &VariantService,
    request: Request,
    json: bool,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) {
    match request {
        Request::Lookup { requester, rsids } => {
            for raw in rsids {
                let deadline = timeout.map(|t| Instant::now() + t);
                let outcome = service
                    .resolve_with_cancel(&raw, &requester, deadline, cancel)
                    .await;
                render::outcome(&raw, &outcome, json).print(json);
            }
        }
        Request::History { requester } => match service.recent_history(&requester).await {
            Ok(records) => print!("{}", render::history(&records)),
            Err(e) => error!("Failed to read history for {}: {}", requester, e),
        },
    }
}
