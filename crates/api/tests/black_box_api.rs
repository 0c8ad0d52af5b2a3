use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use oryxa_api::app::{AppState, build_app};
use oryxa_automations::{ActionSpec, Automation};
use oryxa_core::{InvoiceId, TenantId};
use oryxa_infra::automations::{
    AutomationEngine, AutomationEvent, AutomationStore, InMemoryAutomationStore, event_channel,
};
use oryxa_infra::jobs::{InMemoryJobStore, JobQueue, RetryPolicy};
use oryxa_infra::records::{InMemoryInvoiceStore, InvoiceStore};
use oryxa_invoicing::{ClientContact, Invoice, InvoiceStatus, Issuer, LineItem};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    queue: Arc<JobQueue>,
    invoices: Arc<InMemoryInvoiceStore>,
    automations: Arc<InMemoryAutomationStore>,
    events: Mutex<mpsc::Receiver<AutomationEvent>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let queue = Arc::new(JobQueue::local(
            Arc::new(InMemoryJobStore::new()),
            RetryPolicy::default(),
        ));
        let invoices = Arc::new(InMemoryInvoiceStore::new());
        let automations = Arc::new(InMemoryAutomationStore::new());
        let engine = Arc::new(AutomationEngine::new(
            automations.clone(),
            queue.clone(),
            invoices.clone(),
        ));

        // Same router as prod, no worker or listener: jobs stay pending and
        // events queue up for inspection.
        let (events_tx, events_rx) = event_channel(64);
        let app = build_app(AppState {
            queue: queue.clone(),
            engine,
            invoices: invoices.clone(),
            events: Some(events_tx),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            queue,
            invoices,
            automations,
            events: Mutex::new(events_rx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn invoice(tenant_id: TenantId, pdf_url: Option<&str>) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: InvoiceId::new(),
        tenant_id,
        number: "INV-2024-0007".into(),
        status: InvoiceStatus::Draft,
        currency: "USD".into(),
        issuer: Issuer {
            name: "Acme Studio".into(),
            ..Issuer::default()
        },
        client: ClientContact {
            name: "Jane Doe".into(),
            email: Some("jane@client.test".into()),
            phone: Some("+1 555 0100".into()),
        },
        issue_date: now,
        due_date: now + ChronoDuration::days(14),
        items: vec![LineItem::new("Design work", 3, 50_000)],
        notes: None,
        pdf_url: pdf_url.map(str::to_string),
        pdf_generated_at: pdf_url.map(|_| now),
        sent_at: None,
        paid_at: None,
    }
}

#[tokio::test]
async fn health_is_public_and_reports_queue() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "Oryxa API");
    assert_eq!(body["queue"]["pendingCount"], 0);
}

#[tokio::test]
async fn tenant_header_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/queue/stats")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = client
        .get(srv.url("/queue/stats"))
        .header("x-tenant-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn enqueue_then_query_job_is_tenant_scoped() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let res = client
        .post(srv.url("/jobs"))
        .header("x-tenant-id", tenant.to_string())
        .json(&json!({
            "type": "send_webhook",
            "payload": {"url": "https://hooks.test/x"},
            "priority": "low",
            "maxRetries": 5
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("job_"));

    let res = client
        .get(srv.url(&format!("/jobs/{job_id}")))
        .header("x-tenant-id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: Value = res.json().await.unwrap();
    assert_eq!(job["type"], "send_webhook");
    assert_eq!(job["status"], "pending");
    assert_eq!(job["priority"], "low");
    assert_eq!(job["maxRetries"], 5);

    let res = client
        .get(srv.url(&format!("/jobs/{job_id}")))
        .header("x-tenant-id", TenantId::new().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/queue/stats"))
        .header("x-tenant-id", tenant.to_string())
        .send()
        .await
        .unwrap();
    let stats: Value = res.json().await.unwrap();
    assert_eq!(stats["pendingCount"], 1);
    assert_eq!(stats["processingCount"], 0);
}

#[tokio::test]
async fn malformed_job_request_is_a_validation_error() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .post(srv.url("/jobs"))
        .header("x-tenant-id", TenantId::new().to_string())
        .json(&json!({"payload": {}}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn simulate_previews_without_enqueueing() {
    let srv = TestServer::spawn().await;
    let tenant = TenantId::new();
    srv.automations
        .save(
            Automation::new(tenant, "Welcome", "invoice_created").with_action(ActionSpec::new(
                "send_whatsapp",
                json!({"message": "Hi {{clientName}}, invoice {{invoiceNumber}} is ready"}),
            )),
        )
        .await
        .unwrap();

    let res = reqwest::Client::new()
        .post(srv.url("/automations/simulate"))
        .header("x-tenant-id", tenant.to_string())
        .json(&json!({
            "trigger": "invoice_created",
            "data": {"clientName": "Jane", "clientPhone": "+15550100", "invoiceNumber": "INV-9"}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["trigger"], "invoice_created");
    assert_eq!(body["message"], "Automation simulated successfully");
    let actions = body["actionsTriggered"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["status"], "simulated");
    assert_eq!(srv.queue.stats().await.unwrap().pending_count, 0);
}

#[tokio::test]
async fn trigger_without_matches_reports_message() {
    let srv = TestServer::spawn().await;

    let res = reqwest::Client::new()
        .post(srv.url("/automations/trigger"))
        .header("x-tenant-id", TenantId::new().to_string())
        .json(&json!({"trigger": "invoice_paid"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "No matching automations found");
    assert_eq!(body["actions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn send_requires_pdf_then_marks_invoice_sent() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();

    let mut draft = invoice(tenant, None);
    draft.number = "INV-2024-0006".into();
    let draft_id = draft.id;
    srv.invoices.insert(draft).await.unwrap();

    let res = client
        .post(srv.url(&format!("/invoices/{draft_id}/send")))
        .header("x-tenant-id", tenant.to_string())
        .json(&json!({"method": "email", "recipient": "jane@client.test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let ready = invoice(tenant, Some("https://files.test/inv.pdf"));
    let ready_id = ready.id;
    srv.invoices.insert(ready).await.unwrap();

    let res = client
        .post(srv.url(&format!("/invoices/{ready_id}/send")))
        .header("x-tenant-id", tenant.to_string())
        .json(&json!({"method": "whatsapp", "recipient": "+15550100"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let job_id = body["jobId"].as_str().unwrap().parse().unwrap();

    let job = srv.queue.get_job_status(job_id).await.unwrap().unwrap();
    assert_eq!(job.job_type.as_str(), "send_whatsapp");
    assert_eq!(job.payload["message"], "Your invoice INV-2024-0007 is ready.");
    assert_eq!(job.priority.as_str(), "high");

    let stored = srv.invoices.get(tenant, ready_id).await.unwrap();
    assert_eq!(stored.status, InvoiceStatus::Sent);
    assert!(stored.sent_at.is_some());
}

#[tokio::test]
async fn generate_pdf_enqueues_high_priority_job() {
    let srv = TestServer::spawn().await;
    let tenant = TenantId::new();
    let inv = invoice(tenant, None);
    let id = inv.id;
    srv.invoices.insert(inv).await.unwrap();

    let res = reqwest::Client::new()
        .post(srv.url(&format!("/invoices/{id}/generate-pdf")))
        .header("x-tenant-id", tenant.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = reqwest::Client::new()
        .post(srv.url(&format!("/invoices/{id}/generate-pdf")))
        .header("x-tenant-id", TenantId::new().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_invoice_numbers_it_and_queues_the_pdf() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = TenantId::new();
    let year = Utc::now().year();
    let draft = json!({
        "client": {"name": "Jane Doe", "email": "jane@client.test"},
        "due_date": Utc::now() + ChronoDuration::days(14),
        "items": [{"description": "Design work", "quantity": 3, "unit_price": 50_000}]
    });

    let res = client
        .post(srv.url("/invoices"))
        .header("x-tenant-id", tenant.to_string())
        .json(&draft)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["number"], format!("INV-{year}-0001"));
    assert_eq!(created["status"], "draft");
    assert_eq!(created["message"], "Invoice created successfully. PDF generation queued.");

    let job_id = created["jobId"].as_str().unwrap().parse().unwrap();
    let job = srv.queue.get_job_status(job_id).await.unwrap().unwrap();
    assert_eq!(job.job_type.as_str(), "pdf_generation");
    assert_eq!(job.priority.as_str(), "high");
    assert_eq!(job.payload["invoiceId"], created["id"]);

    let id: InvoiceId = created["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(srv.invoices.get(tenant, id).await.unwrap().client.name, "Jane Doe");

    let event = srv.events.lock().await.recv().await.unwrap();
    assert_eq!(event.trigger, "invoice_created");
    assert_eq!(event.tenant_id, tenant);
    assert_eq!(event.data["invoiceNumber"], created["number"]);

    let res = client
        .post(srv.url("/invoices"))
        .header("x-tenant-id", tenant.to_string())
        .json(&draft)
        .send()
        .await
        .unwrap();
    let second: Value = res.json().await.unwrap();
    assert_eq!(second["number"], format!("INV-{year}-0002"));
}

#[tokio::test]
async fn create_invoice_rejects_invalid_draft() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.url("/invoices"))
        .header("x-tenant-id", TenantId::new().to_string())
        .json(&json!({
            "client": {"name": "Jane Doe", "email": "jane@client.test"},
            "due_date": Utc::now() + ChronoDuration::days(14),
            "items": []
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "At least one item is required");
    assert_eq!(srv.queue.stats().await.unwrap().pending_count, 0);
}
