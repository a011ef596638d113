use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReturnDocument};
use mongodb::{Client, Collection, Database};
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::MongoConfig;
use crate::models::{
    ActivityAction, ActivityEvent, DocumentRecord, Principal, SecurityAnomaly, SignatureAttempt,
    SignatureStatus,
};

/// Result of atomically counting a failed authentication attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttemptState {
    pub attempts: u32,
    /// Set when this attempt tripped the lockout threshold.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Durable state behind the service: principals, the activity log, anomaly
/// findings, signature attempts, and document party records.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, AppError>;
    async fn insert_principal(&self, principal: &Principal) -> Result<(), AppError>;

    /// Count one failed attempt and apply the lockout once `max_failed` is
    /// reached. The increment is atomic; two racing failures cannot both
    /// observe the pre-increment count.
    async fn record_failed_attempt(
        &self,
        id: Uuid,
        max_failed: u32,
        lock: Duration,
    ) -> Result<FailedAttemptState, AppError>;

    /// Reset failure state and stamp the successful login.
    async fn record_successful_auth(
        &self,
        id: Uuid,
        source_address: Option<&str>,
    ) -> Result<(), AppError>;

    async fn append_activity(&self, event: ActivityEvent) -> Result<(), AppError>;
    async fn count_activity(
        &self,
        principal_id: Uuid,
        actions: &[ActivityAction],
        since: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    async fn insert_anomaly(&self, anomaly: &SecurityAnomaly) -> Result<(), AppError>;
    async fn list_unresolved_anomalies(
        &self,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<SecurityAnomaly>, AppError>;
    async fn resolve_anomaly(&self, id: Uuid, resolved_by: Uuid) -> Result<bool, AppError>;

    async fn insert_signature_attempt(&self, attempt: &SignatureAttempt) -> Result<(), AppError>;
    /// A prior `SIGNED` attempt with this nonce inside the window means the
    /// presented token is a replay.
    async fn find_signed_nonce(
        &self,
        document_id: Uuid,
        nonce: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SignatureAttempt>, AppError>;
    async fn latest_signed_attempt(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SignatureAttempt>, AppError>;
    async fn list_signature_attempts(
        &self,
        document_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SignatureAttempt>, AppError>;

    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, AppError>;
    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

/// MongoDB-backed store.
pub struct MongoStore {
    db: Database,
    principals: Collection<Principal>,
    activity: Collection<ActivityEvent>,
    anomalies: Collection<SecurityAnomaly>,
    signature_attempts: Collection<SignatureAttempt>,
    documents: Collection<DocumentRecord>,
}

impl MongoStore {
    pub async fn connect(config: &MongoConfig) -> Result<Self, AppError> {
        let client = Client::with_uri_str(&config.uri).await?;
        let db = client.database(&config.database);
        Ok(Self {
            principals: db.collection("principals"),
            activity: db.collection("activity_log"),
            anomalies: db.collection("security_anomalies"),
            signature_attempts: db.collection("signature_attempts"),
            documents: db.collection("documents"),
            db,
        })
    }
}

#[async_trait]
impl PersistenceStore for MongoStore {
    async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, AppError> {
        Ok(self
            .principals
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?)
    }

    async fn insert_principal(&self, principal: &Principal) -> Result<(), AppError> {
        self.principals.insert_one(principal, None).await?;
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: Uuid,
        max_failed: u32,
        lock: Duration,
    ) -> Result<FailedAttemptState, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .principals
            .find_one_and_update(
                doc! { "_id": id.to_string() },
                doc! { "$inc": { "failed_attempt_count": 1 } },
                options,
            )
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("principal {id}")))?;

        let attempts = updated.failed_attempt_count;
        let mut locked_until = None;
        if attempts >= max_failed {
            let until = Utc::now() + lock;
            self.principals
                .update_one(
                    doc! { "_id": id.to_string() },
                    doc! { "$set": { "locked_until": mongodb::bson::DateTime::from_chrono(until) } },
                    None,
                )
                .await?;
            locked_until = Some(until);
        }
        Ok(FailedAttemptState {
            attempts,
            locked_until,
        })
    }

    async fn record_successful_auth(
        &self,
        id: Uuid,
        source_address: Option<&str>,
    ) -> Result<(), AppError> {
        let mut set = doc! {
            "failed_attempt_count": 0,
            "last_auth_at": mongodb::bson::DateTime::now(),
        };
        if let Some(source) = source_address {
            set.insert("last_auth_source", source);
        }
        self.principals
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": set, "$unset": { "locked_until": "" } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn append_activity(&self, event: ActivityEvent) -> Result<(), AppError> {
        self.activity.insert_one(event, None).await?;
        Ok(())
    }

    async fn count_activity(
        &self,
        principal_id: Uuid,
        actions: &[ActivityAction],
        since: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let actions: Vec<String> = actions
            .iter()
            .map(|a| {
                serde_json::to_value(a)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            })
            .collect();
        let count = self
            .activity
            .count_documents(
                doc! {
                    "principal_id": principal_id.to_string(),
                    "action": { "$in": actions },
                    "created_at": { "$gte": mongodb::bson::DateTime::from_chrono(since) },
                },
                None,
            )
            .await?;
        Ok(count)
    }

    async fn insert_anomaly(&self, anomaly: &SecurityAnomaly) -> Result<(), AppError> {
        self.anomalies.insert_one(anomaly, None).await?;
        Ok(())
    }

    async fn list_unresolved_anomalies(
        &self,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<SecurityAnomaly>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(skip)
            .limit(limit)
            .build();
        let cursor = self
            .anomalies
            .find(doc! { "resolved": false }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn resolve_anomaly(&self, id: Uuid, resolved_by: Uuid) -> Result<bool, AppError> {
        let result = self
            .anomalies
            .update_one(
                doc! { "_id": id.to_string(), "resolved": false },
                doc! { "$set": {
                    "resolved": true,
                    "resolved_at": mongodb::bson::DateTime::now(),
                    "resolved_by": resolved_by.to_string(),
                } },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn insert_signature_attempt(&self, attempt: &SignatureAttempt) -> Result<(), AppError> {
        self.signature_attempts.insert_one(attempt, None).await?;
        Ok(())
    }

    async fn find_signed_nonce(
        &self,
        document_id: Uuid,
        nonce: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SignatureAttempt>, AppError> {
        Ok(self
            .signature_attempts
            .find_one(
                doc! {
                    "document_id": document_id.to_string(),
                    "nonce": nonce,
                    "status": "SIGNED",
                    "created_at": { "$gte": mongodb::bson::DateTime::from_chrono(since) },
                },
                None,
            )
            .await?)
    }

    async fn latest_signed_attempt(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SignatureAttempt>, AppError> {
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        Ok(self
            .signature_attempts
            .find_one(
                doc! { "document_id": document_id.to_string(), "status": "SIGNED" },
                options,
            )
            .await?)
    }

    async fn list_signature_attempts(
        &self,
        document_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SignatureAttempt>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .signature_attempts
            .find(doc! { "document_id": document_id.to_string() }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, AppError> {
        Ok(self
            .documents
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?)
    }

    async fn insert_document(&self, document: &DocumentRecord) -> Result<(), AppError> {
        self.documents.insert_one(document, None).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}

pub use memory::MemoryStore;

/// In-memory store used by tests and local development without MongoDB.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        principals: HashMap<Uuid, Principal>,
        activity: Vec<ActivityEvent>,
        anomalies: Vec<SecurityAnomaly>,
        signature_attempts: Vec<SignatureAttempt>,
        documents: HashMap<Uuid, DocumentRecord>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<Inner>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PersistenceStore for MemoryStore {
        async fn find_principal(&self, id: Uuid) -> Result<Option<Principal>, AppError> {
            Ok(self.inner.lock().unwrap().principals.get(&id).cloned())
        }

        async fn insert_principal(&self, principal: &Principal) -> Result<(), AppError> {
            self.inner
                .lock()
                .unwrap()
                .principals
                .insert(principal.id, principal.clone());
            Ok(())
        }

        async fn record_failed_attempt(
            &self,
            id: Uuid,
            max_failed: u32,
            lock: Duration,
        ) -> Result<FailedAttemptState, AppError> {
            let mut inner = self.inner.lock().unwrap();
            let principal = inner
                .principals
                .get_mut(&id)
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("principal {id}")))?;
            principal.failed_attempt_count += 1;
            let attempts = principal.failed_attempt_count;
            let mut locked_until = None;
            if attempts >= max_failed {
                let until = Utc::now() + lock;
                principal.locked_until = Some(mongodb::bson::DateTime::from_chrono(until));
                locked_until = Some(until);
            }
            Ok(FailedAttemptState {
                attempts,
                locked_until,
            })
        }

        async fn record_successful_auth(
            &self,
            id: Uuid,
            source_address: Option<&str>,
        ) -> Result<(), AppError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(principal) = inner.principals.get_mut(&id) {
                principal.failed_attempt_count = 0;
                principal.locked_until = None;
                principal.last_auth_at = Some(mongodb::bson::DateTime::now());
                if let Some(source) = source_address {
                    principal.last_auth_source = Some(source.to_string());
                }
            }
            Ok(())
        }

        async fn append_activity(&self, event: ActivityEvent) -> Result<(), AppError> {
            self.inner.lock().unwrap().activity.push(event);
            Ok(())
        }

        async fn count_activity(
            &self,
            principal_id: Uuid,
            actions: &[ActivityAction],
            since: DateTime<Utc>,
        ) -> Result<u64, AppError> {
            let since = mongodb::bson::DateTime::from_chrono(since);
            let count = self
                .inner
                .lock()
                .unwrap()
                .activity
                .iter()
                .filter(|event| {
                    event.principal_id == principal_id
                        && actions.contains(&event.action)
                        && event.created_at >= since
                })
                .count();
            Ok(count as u64)
        }

        async fn insert_anomaly(&self, anomaly: &SecurityAnomaly) -> Result<(), AppError> {
            self.inner.lock().unwrap().anomalies.push(anomaly.clone());
            Ok(())
        }

        async fn list_unresolved_anomalies(
            &self,
            skip: u64,
            limit: i64,
        ) -> Result<Vec<SecurityAnomaly>, AppError> {
            let inner = self.inner.lock().unwrap();
            let mut unresolved: Vec<SecurityAnomaly> = inner
                .anomalies
                .iter()
                .filter(|a| !a.resolved)
                .cloned()
                .collect();
            unresolved.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(unresolved
                .into_iter()
                .skip(skip as usize)
                .take(limit.max(0) as usize)
                .collect())
        }

        async fn resolve_anomaly(&self, id: Uuid, resolved_by: Uuid) -> Result<bool, AppError> {
            let mut inner = self.inner.lock().unwrap();
            match inner.anomalies.iter_mut().find(|a| a.id == id && !a.resolved) {
                Some(anomaly) => {
                    anomaly.resolved = true;
                    anomaly.resolved_at = Some(mongodb::bson::DateTime::now());
                    anomaly.resolved_by = Some(resolved_by);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn insert_signature_attempt(
            &self,
            attempt: &SignatureAttempt,
        ) -> Result<(), AppError> {
            self.inner
                .lock()
                .unwrap()
                .signature_attempts
                .push(attempt.clone());
            Ok(())
        }

        async fn find_signed_nonce(
            &self,
            document_id: Uuid,
            nonce: &str,
            since: DateTime<Utc>,
        ) -> Result<Option<SignatureAttempt>, AppError> {
            let since = mongodb::bson::DateTime::from_chrono(since);
            Ok(self
                .inner
                .lock()
                .unwrap()
                .signature_attempts
                .iter()
                .find(|attempt| {
                    attempt.document_id == document_id
                        && attempt.nonce == nonce
                        && attempt.status == SignatureStatus::Signed
                        && attempt.created_at >= since
                })
                .cloned())
        }

        async fn latest_signed_attempt(
            &self,
            document_id: Uuid,
        ) -> Result<Option<SignatureAttempt>, AppError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .signature_attempts
                .iter()
                .filter(|attempt| {
                    attempt.document_id == document_id
                        && attempt.status == SignatureStatus::Signed
                })
                .max_by_key(|attempt| attempt.created_at)
                .cloned())
        }

        async fn list_signature_attempts(
            &self,
            document_id: Uuid,
            limit: i64,
        ) -> Result<Vec<SignatureAttempt>, AppError> {
            let inner = self.inner.lock().unwrap();
            let mut attempts: Vec<SignatureAttempt> = inner
                .signature_attempts
                .iter()
                .filter(|attempt| attempt.document_id == document_id)
                .cloned()
                .collect();
            attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            attempts.truncate(limit.max(0) as usize);
            Ok(attempts)
        }

        async fn find_document(&self, id: Uuid) -> Result<Option<DocumentRecord>, AppError> {
            Ok(self.inner.lock().unwrap().documents.get(&id).cloned())
        }

        async fn insert_document(&self, document: &DocumentRecord) -> Result<(), AppError> {
            self.inner
                .lock()
                .unwrap()
                .documents
                .insert(document.id, document.clone());
            Ok(())
        }

        async fn ping(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

}
