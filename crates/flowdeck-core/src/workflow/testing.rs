//! Recording collaborator fakes shared by the engine and service tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::FixedOffset;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use uuid::Uuid;

use super::collaborators::{
    ActionServices, CollaboratorError, CollaboratorFuture, EmailMessage, EmailSender, HttpClient,
    HttpRequest, HttpResponse, Notification, NotificationSender, RecordStore,
};
use super::scheduler::{ScheduleTimer, SchedulerError, TimerCallback};

/// Records every collaborator call. Email sends fail while `email_failures`
/// is non-zero (each failure decrements it).
#[derive(Default)]
pub struct Recorder {
    pub emails: Mutex<Vec<EmailMessage>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub records: Mutex<Vec<(String, Value)>>,
    pub requests: Mutex<Vec<HttpRequest>>,
    pub email_attempts: AtomicU32,
    pub email_failures: AtomicU32,
    pub http_status: Mutex<Option<u16>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every email send fail.
    pub fn failing_email() -> Arc<Self> {
        let recorder = Self::default();
        recorder.email_failures.store(u32::MAX, Ordering::SeqCst);
        Arc::new(recorder)
    }

    pub fn services(self: &Arc<Self>) -> ActionServices {
        ActionServices {
            email: self.clone(),
            notifications: self.clone(),
            records: self.clone(),
            http: self.clone(),
        }
    }

    pub fn email_count(&self) -> usize {
        self.emails.lock().unwrap().len()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

impl EmailSender for Recorder {
    fn send_email<'a>(
        &'a self,
        _tenant_id: &'a Uuid,
        message: &'a EmailMessage,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            self.email_attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.email_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.email_failures.store(remaining - 1, Ordering::SeqCst);
                }
                return Err(CollaboratorError::Failed("smtp unavailable".to_string()));
            }
            let mut emails = self.emails.lock().unwrap();
            emails.push(message.clone());
            Ok(json!({"messageId": format!("msg-{}", emails.len())}))
        })
    }
}

impl NotificationSender for Recorder {
    fn send_notification<'a>(
        &'a self,
        _tenant_id: &'a Uuid,
        notification: &'a Notification,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            let mut sent = self.notifications.lock().unwrap();
            sent.push(notification.clone());
            Ok(json!({"notificationId": format!("ntf-{}", sent.len())}))
        })
    }
}

impl RecordStore for Recorder {
    fn create_record<'a>(
        &'a self,
        _tenant_id: &'a Uuid,
        collection: &'a str,
        data: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            let id = format!("rec-{}", records.len() + 1);
            let mut record = data.clone();
            if let Value::Object(map) = &mut record {
                map.insert("id".to_string(), json!(id));
            }
            records.push((collection.to_string(), record.clone()));
            Ok(record)
        })
    }

    fn update_record<'a>(
        &'a self,
        _tenant_id: &'a Uuid,
        collection: &'a str,
        id: &'a str,
        changes: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            let found = records
                .iter_mut()
                .find(|(c, r)| c.as_str() == collection && r["id"] == json!(id));
            let Some((_, record)) = found else {
                return Err(CollaboratorError::NotFound(format!("{collection}/{id}")));
            };
            if let (Value::Object(target), Value::Object(src)) = (record, changes) {
                for (k, v) in src {
                    target.insert(k.clone(), v.clone());
                }
                return Ok(Value::Object(target.clone()));
            }
            Err(CollaboratorError::Failed("changes must be an object".to_string()))
        })
    }
}

impl HttpClient for Recorder {
    fn send<'a>(&'a self, request: &'a HttpRequest) -> CollaboratorFuture<'a, HttpResponse> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let status = self.http_status.lock().unwrap().unwrap_or(200);
            Ok(HttpResponse {
                status,
                headers: Default::default(),
                body: json!({"echo": request.body.clone()}),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// ManualTimer
// ---------------------------------------------------------------------------

/// Timer that only fires when the test says so.
#[derive(Default)]
pub struct ManualTimer {
    timers: Mutex<HashMap<Uuid, (String, TimerCallback)>>,
    yield_on_register: bool,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Timer whose `register` yields to the runtime before storing the
    /// timer, so concurrent activations interleave.
    pub fn yielding() -> Arc<Self> {
        Arc::new(Self {
            yield_on_register: true,
            ..Self::default()
        })
    }

    pub fn registered_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    pub fn registered_crons(&self) -> Vec<String> {
        let mut crons: Vec<String> = self
            .timers
            .lock()
            .unwrap()
            .values()
            .map(|(cron, _)| cron.clone())
            .collect();
        crons.sort();
        crons
    }

    /// Fire every registered timer once, in turn.
    pub async fn fire_all(&self) {
        let callbacks: Vec<TimerCallback> = self
            .timers
            .lock()
            .unwrap()
            .values()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback().await;
        }
    }
}

impl ScheduleTimer for ManualTimer {
    fn register(
        &self,
        cron: String,
        _timezone: FixedOffset,
        callback: TimerCallback,
    ) -> BoxFuture<'_, Result<Uuid, SchedulerError>> {
        Box::pin(async move {
            if self.yield_on_register {
                tokio::task::yield_now().await;
            }
            let handle = Uuid::now_v7();
            self.timers.lock().unwrap().insert(handle, (cron, callback));
            Ok(handle)
        })
    }

    fn cancel(&self, handle: Uuid) -> BoxFuture<'_, Result<(), SchedulerError>> {
        Box::pin(async move {
            self.timers.lock().unwrap().remove(&handle);
            Ok(())
        })
    }
}
