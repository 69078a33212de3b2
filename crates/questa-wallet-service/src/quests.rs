//! Quest approval flow
//!
//! Consumes the hosted photo-verification collaborator and turns an
//! approved quest into an `earn` with the photo as proof. The core only
//! acts on the boolean + confidence result; timeout and retry are
//! already wrapped around the hosted call.

use std::sync::Arc;

use questa_core::{Error, QuestVerifier, Result};

use crate::config::QuestConfig;
use crate::engine::WalletEngine;

const VERIFICATION_PROMPT: &str = "You are verifying a child's real-world quest for a \
parental-control app. Decide whether the photo shows the described task genuinely completed. \
Task: ";

/// Outcome of a quest submission
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuestDecision {
    /// Whether the reward was granted
    pub approved: bool,
    /// Verifier confidence 0-100
    pub confidence: u8,
    /// Verifier reasoning, shown to the guardian on dispute
    pub reasoning: String,
}

/// Reviews quest submissions and grants rewards
pub struct QuestReview {
    engine: WalletEngine,
    verifier: Arc<dyn QuestVerifier>,
    config: QuestConfig,
}

impl QuestReview {
    /// Create a review flow with an explicit verifier handle
    pub fn new(engine: WalletEngine, verifier: Arc<dyn QuestVerifier>, config: QuestConfig) -> Self {
        Self {
            engine,
            verifier,
            config,
        }
    }

    /// Submit a quest photo for verification.
    ///
    /// An approved quest earns `reward` tokens with the photo attached as
    /// proof. A rejection or low-confidence result grants nothing and
    /// returns the verifier's reasoning.
    pub async fn submit(
        &self,
        description: &str,
        reward: i64,
        image: &[u8],
        proof_ref: &str,
    ) -> Result<QuestDecision> {
        if reward <= 0 {
            return Err(Error::Validation(format!(
                "quest reward must be positive, got {}",
                reward
            )));
        }
        if description.trim().is_empty() {
            return Err(Error::Validation(
                "quest description must not be empty".to_string(),
            ));
        }

        let prompt = format!("{}{}", VERIFICATION_PROMPT, description);
        let verification = self.verifier.verify(image, description, &prompt).await?;

        let approved = verification.is_valid && verification.confidence >= self.config.min_confidence;
        if approved {
            self.engine
                .earn(reward, description, Some(proof_ref))
                .await?;
            tracing::info!(
                "Quest approved ({}% confidence): {} tokens for \"{}\"",
                verification.confidence,
                reward,
                description
            );
        } else {
            tracing::info!(
                "Quest not approved ({}% confidence, valid={}): {}",
                verification.confidence,
                verification.is_valid,
                verification.reasoning
            );
        }

        Ok(QuestDecision {
            approved,
            confidence: verification.confidence,
            reasoning: verification.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::connectivity::ConnectivityMonitor;
    use crate::engine::SharedDb;
    use parking_lot::Mutex;
    use questa_core::{MockRemoteLedger, MockVerifier, Profile, Role, Verification};
    use questa_storage_sqlite::Database;

    fn shared_db() -> SharedDb {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    async fn review_with(verifier: MockVerifier) -> (QuestReview, MockRemoteLedger) {
        let remote = MockRemoteLedger::new();
        remote.insert_profile(Profile::new("p1", "Ava", Role::Ward));

        let engine = WalletEngine::new(
            "p1",
            Arc::new(remote.clone()),
            shared_db(),
            ConnectivityMonitor::new(true),
            WalletConfig::default(),
        );
        engine.bootstrap().await.unwrap();

        (
            QuestReview::new(engine, Arc::new(verifier), QuestConfig::default()),
            remote,
        )
    }

    #[tokio::test]
    async fn test_approved_quest_earns_with_proof() {
        let (review, remote) = review_with(MockVerifier::approving(90)).await;

        let decision = review
            .submit("clean your room", 10, b"photo-bytes", "photos/room.jpg")
            .await
            .unwrap();

        assert!(decision.approved);
        assert_eq!(remote.stored_profile("p1").unwrap().balance, 10);
        let committed = remote.committed_transactions();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].proof_ref.as_deref(), Some("photos/room.jpg"));
    }

    #[tokio::test]
    async fn test_rejected_quest_earns_nothing() {
        let (review, remote) = review_with(MockVerifier::rejecting("room is still a mess")).await;

        let decision = review
            .submit("clean your room", 10, b"photo-bytes", "photos/room.jpg")
            .await
            .unwrap();

        assert!(!decision.approved);
        assert_eq!(decision.reasoning, "room is still a mess");
        assert_eq!(remote.stored_profile("p1").unwrap().balance, 0);
        assert!(remote.committed_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_is_not_approved() {
        let verifier = MockVerifier::approving(90);
        verifier.set_outcome(Verification {
            is_valid: true,
            confidence: 40,
            reasoning: "hard to tell from this angle".to_string(),
        });
        let (review, remote) = review_with(verifier).await;

        let decision = review
            .submit("do your homework", 5, b"photo-bytes", "photos/hw.jpg")
            .await
            .unwrap();

        assert!(!decision.approved);
        assert_eq!(decision.confidence, 40);
        assert!(remote.committed_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_submission_rejected() {
        let (review, _remote) = review_with(MockVerifier::approving(90)).await;

        assert!(matches!(
            review.submit("quest", 0, b"x", "p").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            review.submit("  ", 5, b"x", "p").await,
            Err(Error::Validation(_))
        ));
    }
}
