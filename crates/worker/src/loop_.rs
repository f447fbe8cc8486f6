use std::sync::Arc;
use std::time::Duration;

use ease_client::AgentClient;
use ease_core::retry::with_backoff;
use ease_core::{build_status, current_unix_milli, Concurrency, ProxyRequestData, Status, Task};
use ease_handler::Handler;
use ease_proxy::ProxyAdapter;
use serde_json::Value;

use crate::config::{HandlersConfig, WorkerConfig};
use crate::error::WorkerError;
use crate::heartbeat;

const UNAVAILABLE_SLEEP: Duration = Duration::from_millis(50);
const NEXT_ERROR_SLEEP: Duration = Duration::from_millis(500);
const NO_TASK_SLEEP: Duration = Duration::from_millis(200);
const EMPTY_REQUEST_ID_SLEEP: Duration = Duration::from_millis(200);
const DISPATCH_SLEEP: Duration = Duration::from_millis(50);

/// Drives the worker for the lifetime of the process: validates configuration,
/// starts the heartbeat, then runs the main poll loop forever (§4.9).
///
/// Only a configuration error returns; everything else is handled in place, and
/// an unhealthy, idle agent ends the process directly (§4.9 step 3, §7 category 8).
pub async fn run(config: WorkerConfig) -> Result<(), WorkerError> {
    config.handlers.validate(config.test_mode)?;

    let client = Arc::new(
        AgentClient::new(&config.agent_url)
            .expect("agent url was already validated as a well-formed url"),
    );
    let concurrency = Arc::new(match &config.handlers {
        HandlersConfig::Handler {
            concurrency_modifier,
            ..
        } => Concurrency::new(concurrency_modifier.clone()),
        HandlersConfig::Proxy { .. } => Concurrency::new(None),
    });

    let _heartbeat = heartbeat::spawn(client.clone(), concurrency.clone(), config.heartbeat_interval_secs);

    match config.handlers {
        HandlersConfig::Handler {
            handler,
            concurrency_modifier: _,
        } => run_handler_mode(client, concurrency, handler).await,
        HandlersConfig::Proxy {
            base_url,
            check_start,
        } => {
            ease_proxy::wait_until_ready(&check_start).await;
            let adapter = Arc::new(ProxyAdapter::new(base_url));
            run_proxy_mode(client, concurrency, adapter).await
        }
    }

    Ok(())
}

async fn run_handler_mode(client: Arc<AgentClient>, concurrency: Arc<Concurrency>, handler: Arc<Handler>) {
    let webhook_client = reqwest::Client::new();
    loop {
        if !concurrency.is_available().await {
            tokio::time::sleep(UNAVAILABLE_SLEEP).await;
            continue;
        }

        let (task, healthy) = match client.next().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to get task");
                tokio::time::sleep(NEXT_ERROR_SLEEP).await;
                continue;
            }
        };

        if concurrency.get_jobs().await.is_empty() && !healthy {
            tracing::error!("agent is not healthy, exit worker");
            std::process::exit(1);
        }

        let Some(task) = task else {
            tokio::time::sleep(NO_TASK_SLEEP).await;
            continue;
        };

        if task.header.request_id.is_empty() {
            tracing::error!("request id of task is empty");
            tokio::time::sleep(EMPTY_REQUEST_ID_SLEEP).await;
            continue;
        }

        concurrency.add_job(task.header.request_id.clone()).await;
        let client = client.clone();
        let concurrency = concurrency.clone();
        let handler = handler.clone();
        let webhook_client = webhook_client.clone();
        tokio::spawn(async move {
            let request_id = task.header.request_id.clone();
            handle_task(&client, &handler, &webhook_client, task).await;
            client.ack(&request_id).await;
            concurrency.remove_job(&request_id).await;
        });

        tokio::time::sleep(DISPATCH_SLEEP).await;
    }
}

async fn handle_task(client: &AgentClient, handler: &Handler, webhook_client: &reqwest::Client, task: Task) {
    let header = task.header.clone();
    let span = tracing::info_span!("task", request_id = %header.request_id);
    let _enter = span.enter();
    tracing::info!("handle request");

    let exec_start_ts = current_unix_milli().max(header.enqueue_at);
    let queueing_duration = exec_start_ts - header.enqueue_at;

    let (request, webhook) = match parse_handler_input(&header, &task.data) {
        Ok(v) => v,
        Err(error) => {
            tracing::error!(error = %error, "failed to parse input");
            let status = build_status(
                &header,
                current_unix_milli(),
                "",
                Status::Failed,
                queueing_duration,
                0,
                0,
                error,
            );
            client.report_status(&header.request_id, &status).await;
            return;
        }
    };

    if queueing_duration > header.ttl {
        let error = format!("message enqueue time exceed ttl {}", header.ttl);
        tracing::error!(error = %error, "ttl exceeded");
        let status = build_status(
            &header,
            current_unix_milli(),
            "",
            Status::Failed,
            queueing_duration,
            0,
            0,
            error.clone(),
        );
        client.report_status(&header.request_id, &status).await;
        let body = serde_json::json!({ "error": error }).to_string();
        deliver(
            client,
            webhook_client,
            &header.request_id,
            &webhook,
            408,
            &error,
            body.as_bytes(),
        )
        .await;
        return;
    }

    let executing = build_status(
        &header,
        current_unix_milli(),
        "",
        Status::Executing,
        queueing_duration,
        0,
        0,
        "start executing",
    );
    client.report_status(&header.request_id, &executing).await;

    let outcome = handler.call(request).await;

    let exec_finish_ts = current_unix_milli();
    let exec_duration = exec_finish_ts - exec_start_ts;
    let total_duration = exec_finish_ts - header.enqueue_at;

    let data = match outcome {
        Ok(item) => match item.into_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                report_handler_failure(client, &header, &webhook, webhook_client, queueing_duration, exec_duration, total_duration, &e.to_string()).await;
                return;
            }
        },
        Err(e) => {
            report_handler_failure(client, &header, &webhook, webhook_client, queueing_duration, exec_duration, total_duration, &e.to_string()).await;
            return;
        }
    };

    let err = deliver(client, webhook_client, &header.request_id, &webhook, 200, "", &data).await;
    match err {
        Some(message) => {
            let error = format!("failed to send request {}: {message}", header.request_id);
            tracing::error!(error = %error, "delivery failed");
            let status = build_status(
                &header,
                current_unix_milli(),
                &webhook,
                Status::Failed,
                queueing_duration,
                exec_duration,
                total_duration,
                error,
            );
            client.report_status(&header.request_id, &status).await;
        }
        None => {
            let status = build_status(
                &header,
                current_unix_milli(),
                &webhook,
                Status::Succeed,
                queueing_duration,
                exec_duration,
                total_duration,
                "succeed",
            );
            client.report_status(&header.request_id, &status).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn report_handler_failure(
    client: &AgentClient,
    header: &ease_core::MsgHeader,
    webhook: &str,
    webhook_client: &reqwest::Client,
    queueing_duration: i64,
    exec_duration: i64,
    total_duration: i64,
    message: &str,
) {
    let error = format!("failed to handle message {}: {message}", header.request_id);
    tracing::error!(error = %error, "handler failed");
    let status = build_status(
        header,
        current_unix_milli(),
        webhook,
        Status::Failed,
        queueing_duration,
        exec_duration,
        total_duration,
        error.clone(),
    );
    client.report_status(&header.request_id, &status).await;
    let body = serde_json::json!({ "error": message }).to_string();
    deliver(client, webhook_client, &header.request_id, webhook, 500, &error, body.as_bytes()).await;
}

/// JSON-decodes the body, requires `input`, applies the async-mode webhook
/// override, and stamps `meta.requestID` when absent (§4.9 step b, §9).
fn parse_handler_input(header: &ease_core::MsgHeader, data: &[u8]) -> Result<(Value, String), String> {
    let mut request: Value = serde_json::from_slice(data)
        .map_err(|e| format!("failed to parse input by using json, err: {e}"))?;

    if request.get("input").is_none() {
        return Err("failed to parse input by using json, err: missing field `input`".to_string());
    }

    let mut webhook = header.webhook.clone();
    if header.mode == ease_core::Mode::Async {
        webhook = match request.get("webhook") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err("failed to parse input by using json, err: missing field `webhook`".to_string()),
        };
    }

    match request.get("meta") {
        None => {
            if let Some(obj) = request.as_object_mut() {
                obj.insert(
                    "meta".to_string(),
                    serde_json::json!({ "requestID": header.request_id }),
                );
            }
        }
        Some(_) => {
            tracing::warn!(request_id = %header.request_id, "meta info already exists in request, cannot add meta info");
        }
    }

    Ok((request, webhook))
}

/// Sends the terminal payload to the webhook (if set) and always to the agent
/// result endpoint, returning the first error encountered (§4.9 step f).
async fn deliver(
    client: &AgentClient,
    webhook_client: &reqwest::Client,
    request_id: &str,
    webhook: &str,
    status_code: u16,
    message: &str,
    data: &[u8],
) -> Option<String> {
    let mut err = None;

    if !webhook.is_empty() {
        let status_code_str = status_code.to_string();
        let result = with_backoff(|| {
            let webhook_client = webhook_client.clone();
            let data = data.to_vec();
            let status_code_str = status_code_str.clone();
            async move {
                webhook_client
                    .post(webhook)
                    .query(&[("requestID", request_id), ("statusCode", status_code_str.as_str())])
                    .header("Content-Type", "application/json")
                    .body(data)
                    .send()
                    .await
            }
        })
        .await;

        match result {
            Ok(resp) if resp.status().as_u16() == 200 => {}
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                err = Some(format!("request {request_id} failed {status}: {body}"));
            }
            Err(e) => err = Some(e.to_string()),
        }
    }

    if let Err(e) = client.send_result(request_id, status_code, message, data).await {
        tracing::error!(error = %e, "failed to send result to agent");
        err = Some(match err {
            Some(existing) => format!("{existing}, failed to send result to agent: {e}"),
            None => format!("failed to send result to agent: {e}"),
        });
    }

    err
}

async fn run_proxy_mode(client: Arc<AgentClient>, concurrency: Arc<Concurrency>, adapter: Arc<ProxyAdapter>) {
    loop {
        if !concurrency.is_available().await {
            tokio::time::sleep(UNAVAILABLE_SLEEP).await;
            continue;
        }

        let (task, healthy) = match client.next().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to get task");
                tokio::time::sleep(NEXT_ERROR_SLEEP).await;
                continue;
            }
        };

        if concurrency.get_jobs().await.is_empty() && !healthy {
            tracing::error!("agent is not healthy, exit worker");
            std::process::exit(1);
        }

        let Some(task) = task else {
            tokio::time::sleep(NO_TASK_SLEEP).await;
            continue;
        };

        if task.header.request_id.is_empty() {
            tracing::error!("request id of task is empty");
            tokio::time::sleep(EMPTY_REQUEST_ID_SLEEP).await;
            continue;
        }

        concurrency.add_job(task.header.request_id.clone()).await;
        let client = client.clone();
        let concurrency = concurrency.clone();
        let adapter = adapter.clone();
        tokio::spawn(async move {
            let request_id = task.header.request_id.clone();
            handle_proxy_task(&client, &adapter, task).await;
            client.ack(&request_id).await;
            concurrency.remove_job(&request_id).await;
        });

        tokio::time::sleep(DISPATCH_SLEEP).await;
    }
}

async fn handle_proxy_task(client: &AgentClient, adapter: &ProxyAdapter, task: Task) {
    let header = task.header.clone();
    let span = tracing::info_span!("task", request_id = %header.request_id);
    let _enter = span.enter();

    let exec_start_ts = current_unix_milli().max(header.enqueue_at);
    let queueing_duration = exec_start_ts - header.enqueue_at;

    let data = match ProxyRequestData::parse(&task.data) {
        Ok(v) => v,
        Err(e) => {
            let error = format!("failed to parse proxy request: {e}");
            tracing::error!(error = %error, "failed to parse proxy request");
            let status = build_status(&header, current_unix_milli(), "", Status::Failed, queueing_duration, 0, 0, error);
            client.report_status(&header.request_id, &status).await;
            return;
        }
    };

    if queueing_duration > header.ttl {
        let error = format!("message enqueue time exceed ttl {}", header.ttl);
        tracing::error!(error = %error, "ttl exceeded");
        let status = build_status(&header, current_unix_milli(), "", Status::Failed, queueing_duration, 0, 0, error);
        client.report_status(&header.request_id, &status).await;
        return;
    }

    let executing = build_status(&header, current_unix_milli(), "", Status::Executing, queueing_duration, 0, 0, "start executing");
    client.report_status(&header.request_id, &executing).await;

    let forward_result = adapter.forward(&data).await;
    let exec_finish_ts;
    let delivery_err: Option<String> = match forward_result {
        Ok(resp) => {
            let status_code = resp.status().as_u16();
            let sent = client.send_proxy(&header.request_id, status_code, resp).await;
            exec_finish_ts = current_unix_milli();
            sent.err().map(|e| e.to_string())
        }
        Err(e) => {
            exec_finish_ts = current_unix_milli();
            Some(e.to_string())
        }
    };

    let exec_duration = exec_finish_ts - exec_start_ts;
    let total_duration = exec_finish_ts - header.enqueue_at;

    match delivery_err {
        None => {
            let status = build_status(&header, current_unix_milli(), "", Status::Succeed, queueing_duration, exec_duration, total_duration, "succeed");
            client.report_status(&header.request_id, &status).await;
        }
        Some(message) => {
            let error = format!("failed to proxy request {}: {message}", header.request_id);
            tracing::error!(error = %error, "proxy delivery failed");
            let status = build_status(&header, current_unix_milli(), "", Status::Failed, queueing_duration, exec_duration, total_duration, error);
            client.report_status(&header.request_id, &status).await;
        }
    }
}
