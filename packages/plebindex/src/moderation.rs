//! Moderation cascade.
//!
//! Classifiers are tried in priority order (A, B, C). A rate limit anywhere
//! sleeps until the provider-indicated retry time and restarts the entire
//! cascade from A, with no partial reuse. A non-rate-limit failure of A
//! falls through to B then C, first success wins; if all fail the content
//! stays unclassified. When A succeeds its answer is corroborated with B
//! and, on disagreement, tie-broken by C; without a majority, A's answer
//! stands.
//!
//! Flagging is soft: a flagged post is copied into `flagged_posts` as
//! `pending` and the original row is left untouched for an admin to inspect.

use std::sync::Arc;
use std::time::Duration;

use classifier_client::{ClassifierError, ModerationCategory, Verdict};

use crate::error::Result;
use crate::traits::{Classify, IndexStore};
use crate::types::{FlagSource, FlaggedPost, Post};

/// Outcome of the cascade for one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeOutcome {
    Verdict(Verdict),
    /// Every classifier failed; the content stays unclassified.
    Unknown,
}

pub struct Moderator<S, X> {
    store: Arc<S>,
    classifier: Arc<X>,
    /// Prioritized model names (A, B, C).
    models: Vec<String>,
}

impl<S, X> Moderator<S, X>
where
    S: IndexStore,
    X: Classify,
{
    pub fn new(store: Arc<S>, classifier: Arc<X>, models: Vec<String>) -> Self {
        Self {
            store,
            classifier,
            models,
        }
    }

    /// Run the cascade over one piece of text.
    pub async fn classify_content(&self, text: &str) -> CascadeOutcome {
        loop {
            match self.cascade_once(text).await {
                Ok(outcome) => return outcome,
                Err(retry_after) => {
                    tracing::warn!(
                        ?retry_after,
                        "Classifier rate limited, restarting cascade after backoff"
                    );
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// One full pass. `Err(retry_after)` means a provider rate-limited us and
    /// the whole cascade must restart from A after the delay.
    async fn cascade_once(&self, text: &str) -> std::result::Result<CascadeOutcome, Duration> {
        let Some(model_a) = self.models.first() else {
            return Ok(CascadeOutcome::Unknown);
        };

        let verdict_a = match self.classifier.classify(model_a, text).await {
            Ok(verdict) => verdict,
            Err(ClassifierError::RateLimited { retry_after }) => return Err(retry_after),
            Err(e) => {
                tracing::warn!(model = %model_a, error = %e, "Primary classifier failed");
                // Fall through the successors; first success wins.
                for model in self.models.iter().skip(1) {
                    match self.classifier.classify(model, text).await {
                        Ok(verdict) => return Ok(CascadeOutcome::Verdict(verdict)),
                        Err(ClassifierError::RateLimited { retry_after }) => {
                            return Err(retry_after)
                        }
                        Err(e) => {
                            tracing::warn!(model = %model, error = %e, "Fallback classifier failed");
                        }
                    }
                }
                return Ok(CascadeOutcome::Unknown);
            }
        };

        // Corroborate A with B.
        let Some(model_b) = self.models.get(1) else {
            return Ok(CascadeOutcome::Verdict(verdict_a));
        };
        let verdict_b = match self.classifier.classify(model_b, text).await {
            Ok(verdict) => verdict,
            Err(ClassifierError::RateLimited { retry_after }) => return Err(retry_after),
            Err(e) => {
                tracing::warn!(model = %model_b, error = %e, "Corroborating classifier failed, keeping primary verdict");
                return Ok(CascadeOutcome::Verdict(verdict_a));
            }
        };

        if verdict_b.category == verdict_a.category {
            return Ok(CascadeOutcome::Verdict(verdict_a));
        }

        // A and B disagree: C is the tiebreaker. Without C (unconfigured or
        // failed) there is no majority among two disagreeing answers, so A's
        // verdict stands.
        let Some(model_c) = self.models.get(2) else {
            return Ok(CascadeOutcome::Verdict(verdict_a));
        };
        match self.classifier.classify(model_c, text).await {
            Ok(verdict_c) if verdict_c.category == verdict_b.category => {
                Ok(CascadeOutcome::Verdict(verdict_b))
            }
            Ok(_) => Ok(CascadeOutcome::Verdict(verdict_a)),
            Err(ClassifierError::RateLimited { retry_after }) => Err(retry_after),
            Err(e) => {
                tracing::warn!(model = %model_c, error = %e, "Tiebreak classifier failed, keeping primary verdict");
                Ok(CascadeOutcome::Verdict(verdict_a))
            }
        }
    }

    /// Classify one post and record the result. The post is stamped
    /// `moderated_at` exactly once, even when its content is empty or every
    /// classifier fails, so the backlog always makes progress.
    pub async fn moderate_post(&self, post: &Post) -> Result<()> {
        let text = moderation_text(post);
        if text.trim().is_empty() {
            self.store.mark_moderated(&post.cid).await?;
            return Ok(());
        }

        match self.classify_content(&text).await {
            CascadeOutcome::Verdict(verdict) if verdict.category != ModerationCategory::Safe => {
                tracing::info!(
                    cid = %post.cid,
                    category = verdict.category.as_str(),
                    harm = verdict.harm,
                    "Post flagged"
                );
                self.store
                    .insert_flagged(&FlaggedPost::from_verdict(post, &verdict, FlagSource::Cascade))
                    .await?;
            }
            CascadeOutcome::Verdict(_) => {}
            CascadeOutcome::Unknown => {
                tracing::warn!(cid = %post.cid, "All classifiers failed, leaving post unflagged");
            }
        }

        self.store.mark_moderated(&post.cid).await?;
        Ok(())
    }

    /// Moderate a batch; a failure on one post never aborts the rest.
    pub async fn moderate_posts(&self, posts: &[Post]) {
        for post in posts {
            if let Err(e) = self.moderate_post(post).await {
                tracing::warn!(cid = %post.cid, error = %e, "Moderation failed for post");
            }
        }
    }

    /// Periodic sweep over the unmoderated backlog.
    pub async fn sweep(&self, limit: i64) -> Result<usize> {
        let posts = self.store.unmoderated_posts(limit).await?;
        if posts.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = posts.len(), "Moderating backlog batch");
        let count = posts.len();
        self.moderate_posts(&posts).await;
        Ok(count)
    }
}

fn moderation_text(post: &Post) -> String {
    match (&post.title, &post.content) {
        (Some(title), Some(content)) => format!("{title}\n\n{content}"),
        (Some(title), None) => title.clone(),
        (None, Some(content)) => content.clone(),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{MemoryStore, MockClassifier, MockOutcome};
    use crate::types::FlagAction;

    const A: &str = "model-a";
    const B: &str = "model-b";
    const C: &str = "model-c";

    fn verdict(category: ModerationCategory, harm: i32) -> Verdict {
        Verdict {
            category,
            reason: "because".to_string(),
            harm,
        }
    }

    fn moderator(classifier: MockClassifier) -> Moderator<MemoryStore, MockClassifier> {
        Moderator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(classifier),
            vec![A.to_string(), B.to_string(), C.to_string()],
        )
    }

    fn post(cid: &str, content: Option<&str>) -> Post {
        Post {
            cid: cid.to_string(),
            timestamp: 1_700_000_000,
            title: Some("a title".to_string()),
            content: content.map(|c| c.to_string()),
            subplebbit_address: "memes.eth".to_string(),
            author_address: "alice.eth".to_string(),
            author_display_name: None,
            upvote_count: 0,
            downvote_count: 0,
            reply_count: 0,
            parent_cid: None,
            post_cid: Some(cid.to_string()),
            depth: 0,
            raw: serde_json::Value::Null,
            moderated_at: None,
        }
    }

    #[tokio::test]
    async fn primary_failure_falls_through_to_first_success() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Fail("boom".into())])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::Violence, 8))]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Violence, 8))
        );

        // B's success ends the pass; C is never consulted.
        assert_eq!(moderator.classifier.calls(), vec![A, B]);
    }

    #[tokio::test]
    async fn agreement_between_a_and_b_skips_the_tiebreaker() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 2))]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Safe, 1))
        );
        assert_eq!(moderator.classifier.calls(), vec![A, B]);
    }

    #[tokio::test]
    async fn corroborator_failure_falls_back_to_primary() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Copyright, 5))])
            .script(B, vec![MockOutcome::Fail("boom".into())]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Copyright, 5))
        );
    }

    #[tokio::test]
    async fn disagreement_with_failed_tiebreaker_keeps_primary() {
        // A=SAFE, B=HATE_SPEECH, C fails: no majority among two, A stands.
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::HateSpeech, 7))])
            .script(C, vec![MockOutcome::Fail("boom".into())]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Safe, 1))
        );
        assert_eq!(moderator.classifier.calls(), vec![A, B, C]);
    }

    #[tokio::test]
    async fn tiebreaker_agreeing_with_corroborator_wins() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::HateSpeech, 7))])
            .script(C, vec![MockOutcome::Verdict(verdict(ModerationCategory::HateSpeech, 6))]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::HateSpeech, 7))
        );
    }

    #[tokio::test]
    async fn three_way_disagreement_keeps_primary() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::HateSpeech, 7))])
            .script(C, vec![MockOutcome::Verdict(verdict(ModerationCategory::Copyright, 4))]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Safe, 1))
        );
    }

    #[tokio::test]
    async fn rate_limit_restarts_the_entire_cascade() {
        let classifier = MockClassifier::new()
            .script(
                A,
                vec![
                    MockOutcome::RateLimited(Duration::from_millis(5)),
                    MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1)),
                ],
            )
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))]);
        let moderator = moderator(classifier);

        let outcome = moderator.classify_content("some text").await;
        assert_eq!(
            outcome,
            CascadeOutcome::Verdict(verdict(ModerationCategory::Safe, 1))
        );
        // First pass dies at A's rate limit; the second starts over from A.
        assert_eq!(moderator.classifier.calls(), vec![A, A, B]);
    }

    #[tokio::test]
    async fn all_failures_leave_content_unclassified() {
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Fail("a down".into())])
            .script(B, vec![MockOutcome::Fail("b down".into())])
            .script(C, vec![MockOutcome::Fail("c down".into())]);
        let moderator = moderator(classifier);

        assert_eq!(moderator.classify_content("some text").await, CascadeOutcome::Unknown);
    }

    #[tokio::test]
    async fn flagged_post_is_copied_and_original_left_untouched() {
        let store = Arc::new(MemoryStore::new());
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Violence, 9))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::Violence, 9))]);
        let moderator = Moderator::new(
            store.clone(),
            Arc::new(classifier),
            vec![A.to_string(), B.to_string()],
        );

        let post = post("QmBad", Some("threatening text"));
        store.index_posts(std::slice::from_ref(&post)).await.unwrap();

        moderator.moderate_post(&post).await.unwrap();

        let flagged = store.get_flagged("QmBad").await.unwrap().unwrap();
        assert_eq!(flagged.status, FlagAction::Pending);
        assert_eq!(flagged.category, ModerationCategory::Violence);
        assert_eq!(flagged.harm_score, 9);

        // Soft-flag model: the post row survives, now stamped.
        let original = store.get_post("QmBad").await.unwrap().unwrap();
        assert!(original.moderated_at.is_some());
    }

    #[tokio::test]
    async fn empty_content_is_stamped_without_calling_classifiers() {
        let store = Arc::new(MemoryStore::new());
        let classifier = MockClassifier::new();
        let moderator = Moderator::new(
            store.clone(),
            Arc::new(classifier),
            vec![A.to_string()],
        );

        let mut empty = post("QmEmpty", None);
        empty.title = None;
        store.index_posts(std::slice::from_ref(&empty)).await.unwrap();

        moderator.moderate_post(&empty).await.unwrap();

        assert!(store.get_post("QmEmpty").await.unwrap().unwrap().moderated_at.is_some());
        assert_eq!(moderator.classifier.calls(), Vec::<String>::new());
        assert_eq!(store.flagged_count(), 0);
    }

    #[tokio::test]
    async fn sweep_stamps_every_post_in_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let classifier = MockClassifier::new()
            .script(A, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))])
            .script(B, vec![MockOutcome::Verdict(verdict(ModerationCategory::Safe, 1))]);
        let moderator = Moderator::new(
            store.clone(),
            Arc::new(classifier),
            vec![A.to_string(), B.to_string()],
        );

        store
            .index_posts(&[post("Qm1", Some("x")), post("Qm2", Some("y"))])
            .await
            .unwrap();

        let processed = moderator.sweep(10).await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(moderator.sweep(10).await.unwrap(), 0);
    }
}
