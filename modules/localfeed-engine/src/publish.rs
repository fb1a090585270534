//! Writing new content. Keywords are generated here, at write time, so that
//! search can run over fetched documents without a full-text index.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use localfeed_common::{Event, FeedError, Poll, PollOption, Post, TextSearchIndex};
use tracing::info;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::store::{collections, DocumentStore, Write};

/// External text classifier (profanity and similar).
pub trait TextClassifier: Send + Sync {
    fn is_objectionable(&self, text: &str) -> bool;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl TextClassifier for AllowAll {
    fn is_objectionable(&self, _text: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PostDraft {
    #[builder(setter(into))]
    pub author_id: String,
    #[builder(setter(into))]
    pub author_name: String,
    #[builder(setter(into))]
    pub text: String,
    pub city_ids: Vec<String>,
    #[builder(default, setter(strip_option, into))]
    pub image_url: Option<String>,
    #[builder(default, setter(strip_option))]
    pub poll: Option<PollDraft>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PollDraft {
    #[builder(setter(into))]
    pub title: String,
    #[builder(default, setter(into))]
    pub context: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct EventDraft {
    #[builder(setter(into))]
    pub author_id: String,
    #[builder(setter(into))]
    pub author_name: String,
    #[builder(setter(into))]
    pub city_id: String,
    #[builder(setter(into))]
    pub name: String,
    pub date: DateTime<Utc>,
    #[builder(default, setter(into))]
    pub description: String,
    #[builder(default, setter(into))]
    pub location_details: String,
}

pub struct Publisher {
    store: Arc<dyn DocumentStore>,
    search_index: Arc<dyn TextSearchIndex>,
    classifier: Arc<dyn TextClassifier>,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        search_index: Arc<dyn TextSearchIndex>,
        classifier: Arc<dyn TextClassifier>,
    ) -> Self {
        Self {
            store,
            search_index,
            classifier,
        }
    }

    /// Write a post, and its poll if the draft has one, in one commit.
    pub async fn create_post(&self, draft: PostDraft) -> Result<(Post, Option<Poll>), FeedError> {
        self.screen(&[draft.text.as_str()])?;
        if draft.city_ids.is_empty() {
            return Err(FeedError::Rejected("a post needs at least one city".into()));
        }

        let post_id = Uuid::new_v4().to_string();
        let poll = match &draft.poll {
            Some(p) => {
                self.screen(&[p.title.as_str(), p.context.as_str()])?;
                if p.options.len() < 2 {
                    return Err(FeedError::Rejected("a poll needs at least two options".into()));
                }
                Some(build_poll(p, &post_id))
            }
            None => None,
        };

        let post = Post {
            id: post_id,
            author_id: draft.author_id,
            keywords: self.search_index.index_terms(&[draft.author_name.as_str(), draft.text.as_str()]),
            author_name: draft.author_name,
            created_at: Utc::now(),
            city_ids: draft.city_ids,
            text: draft.text,
            image_url: draft.image_url,
            upvotes: 0,
            downvotes: 0,
            upvotes_this_week: 0,
            comment_count: 0,
            poll_id: poll.as_ref().map(|p| p.id.clone()),
        };

        let mut writes = vec![Write::set(collections::POSTS, &post.id, &post)?];
        if let Some(poll) = &poll {
            writes.push(Write::set(collections::POLLS, &poll.id, poll)?);
            for option in &poll.options {
                writes.push(Write::set(collections::POLL_OPTIONS, &option.id, option)?);
            }
        }
        self.store.commit(writes).await.map_err(FeedError::Remote)?;

        info!(post = post.id.as_str(), cities = post.city_ids.len(), has_poll = poll.is_some(), "Post created");
        Ok((post, poll))
    }

    pub async fn create_event(&self, draft: EventDraft) -> Result<Event, FeedError> {
        self.screen(&[
            draft.name.as_str(),
            draft.description.as_str(),
            draft.location_details.as_str(),
        ])?;

        let event = Event {
            id: Uuid::new_v4().to_string(),
            author_id: draft.author_id,
            keywords: self.search_index.index_terms(&[draft.name.as_str(), draft.author_name.as_str()]),
            author_name: draft.author_name,
            created_at: Utc::now(),
            city_id: draft.city_id,
            name: draft.name,
            date: draft.date,
            rsvps: 0,
            description: draft.description,
            location_details: draft.location_details,
            comment_count: 0,
        };

        self.store
            .commit(vec![Write::set(collections::EVENTS, &event.id, &event)?])
            .await
            .map_err(FeedError::Remote)?;

        info!(event = event.id.as_str(), city = event.city_id.as_str(), "Event created");
        Ok(event)
    }

    fn screen(&self, texts: &[&str]) -> Result<(), FeedError> {
        if texts.iter().any(|t| self.classifier.is_objectionable(t)) {
            return Err(FeedError::Rejected("text failed moderation".into()));
        }
        Ok(())
    }
}

fn build_poll(draft: &PollDraft, post_id: &str) -> Poll {
    let poll_id = Uuid::new_v4().to_string();
    let options = draft
        .options
        .iter()
        .enumerate()
        .map(|(i, text)| PollOption {
            id: format!("{poll_id}_{i}"),
            poll_id: poll_id.clone(),
            text: text.clone(),
            vote_count: 0,
            index: i as u32,
        })
        .collect();
    Poll {
        id: poll_id,
        title: draft.title.clone(),
        context: draft.context.clone(),
        total_votes: 0,
        linked_content_id: Some(post_id.to_string()),
        options,
    }
}
