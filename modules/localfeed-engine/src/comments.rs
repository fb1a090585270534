//! Threaded comments on posts and events.
//!
//! `CommentTree` talks to the document store; `CommentThread` is the flat
//! display list one view works with, including the collapsed/expanded state
//! of each node.
//!
//! Reply chains are walked with an explicit work list bounded by
//! `max_depth`, and a visited set stops malformed (cyclic) parent chains.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use localfeed_common::{Comment, FeedConfig, FeedError};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::publish::TextClassifier;
use crate::store::{collections, Direction, DocumentStore, Query, Write};

#[derive(Debug, Clone, PartialEq)]
pub struct CommentNode {
    pub comment: Comment,
    /// 0 for root comments.
    pub depth: usize,
}

impl CommentNode {
    pub fn id(&self) -> &str {
        &self.comment.id
    }
}

// --- Ordering strategies ---

/// Orders sibling comments for display.
pub trait CommentOrdering: Send + Sync {
    fn sort(&self, siblings: &mut [Comment], now: DateTime<Utc>);
}

/// Oldest first. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chronological;

impl CommentOrdering for Chronological {
    fn sort(&self, siblings: &mut [Comment], _now: DateTime<Utc>) {
        siblings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Highest score first, where score blends upvotes and replies and decays
/// with age:
///
/// `(upvotes + reply_weight * replies) / (age_hours + 2) ^ gravity`
///
/// Replies count as 1 when the comment has any, since only the flag is
/// stored.
#[derive(Debug, Clone, Copy)]
pub struct WeightedScore {
    pub reply_weight: f64,
    pub gravity: f64,
}

impl Default for WeightedScore {
    fn default() -> Self {
        Self {
            reply_weight: 2.0,
            gravity: 1.5,
        }
    }
}

impl WeightedScore {
    pub fn score(&self, comment: &Comment, now: DateTime<Utc>) -> f64 {
        let replies = if comment.has_children { 1.0 } else { 0.0 };
        let age_hours = (now - comment.created_at).num_seconds().max(0) as f64 / 3600.0;
        (comment.upvotes as f64 + self.reply_weight * replies) / (age_hours + 2.0).powf(self.gravity)
    }
}

impl CommentOrdering for WeightedScore {
    fn sort(&self, siblings: &mut [Comment], now: DateTime<Utc>) {
        siblings.sort_by(|a, b| {
            match self.score(b, now).total_cmp(&self.score(a, now)) {
                Ordering::Equal => a.created_at.cmp(&b.created_at),
                other => other,
            }
        });
    }
}

// --- Authoring ---

/// Which collection the commented content lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Post,
    Event,
}

impl ContentKind {
    pub fn collection(self) -> &'static str {
        match self {
            ContentKind::Post => collections::POSTS,
            ContentKind::Event => collections::EVENTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub content_id: String,
    pub kind: ContentKind,
    pub author_id: String,
    pub message: String,
    pub parent_comment_id: Option<String>,
}

// --- CommentTree ---

pub struct CommentTree {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
    max_depth: usize,
    ordering: Arc<dyn CommentOrdering>,
    classifier: Arc<dyn TextClassifier>,
}

impl CommentTree {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: &FeedConfig,
        ordering: Arc<dyn CommentOrdering>,
        classifier: Arc<dyn TextClassifier>,
    ) -> Self {
        Self {
            store,
            page_size: config.comment_page_size,
            max_depth: config.comment_max_depth.max(1),
            ordering,
            classifier,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// First page of top-level comments on `content_id`.
    pub async fn load_roots(&self, content_id: &str) -> Result<Vec<CommentNode>, FeedError> {
        let query = Query::collection(collections::COMMENTS)
            .eq("content_id", content_id)
            .is_null("parent_comment_id")
            .order_by("created_at", Direction::Asc)
            .limit(self.page_size);
        let roots = self.fetch(&query).await?;
        debug!(content = content_id, roots = roots.len(), "Loaded root comments");
        Ok(self.order(roots, 0))
    }

    /// Every reply below `parent_id`, flattened in display order (each
    /// comment followed by its own replies). `depth` is the parent's depth.
    /// Nothing at depth `max_depth` or deeper is loaded.
    pub async fn load_children(&self, parent_id: &str, depth: usize) -> Result<Vec<CommentNode>, FeedError> {
        let mut visited: HashSet<String> = HashSet::from([parent_id.to_string()]);
        let mut out = Vec::new();
        let mut stack: Vec<CommentNode> = Vec::new();

        self.push_replies(parent_id, depth + 1, &mut visited, &mut stack).await?;
        while let Some(node) = stack.pop() {
            let id = node.comment.id.clone();
            let child_depth = node.depth + 1;
            out.push(node);
            self.push_replies(&id, child_depth, &mut visited, &mut stack).await?;
        }

        debug!(parent = parent_id, loaded = out.len(), "Loaded reply subtree");
        Ok(out)
    }

    async fn push_replies(
        &self,
        parent_id: &str,
        depth: usize,
        visited: &mut HashSet<String>,
        stack: &mut Vec<CommentNode>,
    ) -> Result<(), FeedError> {
        if depth >= self.max_depth {
            return Ok(());
        }
        let query = Query::collection(collections::COMMENTS)
            .eq("parent_comment_id", parent_id)
            .order_by("created_at", Direction::Asc);
        let replies = self.order(self.fetch(&query).await?, depth);
        // Reversed so the first reply is popped first.
        for node in replies.into_iter().rev() {
            if visited.insert(node.comment.id.clone()) {
                stack.push(node);
            } else {
                warn!(comment = node.comment.id.as_str(), "Cyclic reply chain, skipping");
            }
        }
        Ok(())
    }

    /// Number of ancestors, capped at `max_depth - 1`. A reply whose parent
    /// has been deleted is level 1.
    pub async fn compute_indent_level(&self, comment: &Comment) -> Result<usize, FeedError> {
        let mut level = 0;
        let mut visited = HashSet::from([comment.id.clone()]);
        let mut next = comment.parent_comment_id.clone();

        while let Some(parent_id) = next {
            if level + 1 >= self.max_depth || !visited.insert(parent_id.clone()) {
                break;
            }
            level += 1;
            next = match self.get(&parent_id).await? {
                Some(parent) => parent.parent_comment_id,
                None => None,
            };
        }
        Ok(level)
    }

    /// Siblings in display order, all at `depth`.
    pub fn order(&self, mut comments: Vec<Comment>, depth: usize) -> Vec<CommentNode> {
        self.ordering.sort(&mut comments, Utc::now());
        comments
            .into_iter()
            .map(|comment| CommentNode { comment, depth })
            .collect()
    }

    /// Write a comment. For a reply the parent's `has_children` flag is set
    /// first, in its own commit; if the comment write then fails the flag
    /// stays set with no visible replies until the next fetch.
    pub async fn post_comment(&self, new: NewComment) -> Result<Comment, FeedError> {
        if self.classifier.is_objectionable(&new.message) {
            return Err(FeedError::Rejected("comment failed moderation".into()));
        }

        if let Some(parent_id) = &new.parent_comment_id {
            if self.get(parent_id).await?.is_none() {
                return Err(FeedError::Rejected(format!("parent comment {parent_id} no longer exists")));
            }
            self.store
                .commit(vec![Write::merge(
                    collections::COMMENTS,
                    parent_id,
                    json!({ "has_children": true }),
                )])
                .await
                .map_err(FeedError::Remote)?;
        }

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            content_id: new.content_id,
            author_id: new.author_id,
            message: new.message,
            created_at: Utc::now(),
            upvotes: 0,
            parent_comment_id: new.parent_comment_id,
            has_children: false,
        };
        self.store
            .commit(vec![
                Write::set(collections::COMMENTS, &comment.id, &comment)?,
                Write::increment(new.kind.collection(), &comment.content_id, "comment_count", 1),
            ])
            .await
            .map_err(FeedError::Remote)?;

        info!(
            comment = comment.id.as_str(),
            content = comment.content_id.as_str(),
            reply = comment.parent_comment_id.is_some(),
            "Comment posted"
        );
        Ok(comment)
    }

    /// Delete one comment. Its parent keeps `has_children` even if this was
    /// the last reply; replies below it are left in place.
    pub async fn delete_comment(&self, comment: &Comment, kind: ContentKind) -> Result<(), FeedError> {
        self.store
            .commit(vec![
                Write::delete(collections::COMMENTS, &comment.id),
                Write::increment(kind.collection(), &comment.content_id, "comment_count", -1),
            ])
            .await
            .map_err(FeedError::Remote)?;
        info!(comment = comment.id.as_str(), "Comment deleted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Comment>, FeedError> {
        match self.store.get(collections::COMMENTS, id).await.map_err(FeedError::Remote)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<Comment>, FeedError> {
        let docs = self.store.query(query).await.map_err(FeedError::Remote)?;
        Ok(docs
            .iter()
            .filter_map(|d| match d.decode() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(id = d.id.as_str(), error = %e, "Skipping malformed comment");
                    None
                }
            })
            .collect())
    }
}

// --- CommentThread ---

/// The flat display list for one content item.
pub struct CommentThread {
    tree: Arc<CommentTree>,
    content_id: String,
    nodes: Vec<CommentNode>,
    expanded: HashSet<String>,
}

impl CommentThread {
    pub fn new(tree: Arc<CommentTree>, content_id: impl Into<String>) -> Self {
        Self {
            tree,
            content_id: content_id.into(),
            nodes: Vec::new(),
            expanded: HashSet::new(),
        }
    }

    /// Replace the list with the root comments, all collapsed.
    pub async fn load(&mut self) -> Result<(), FeedError> {
        let roots = self.tree.load_roots(&self.content_id).await?;
        self.nodes = roots;
        self.expanded.clear();
        Ok(())
    }

    pub fn nodes(&self) -> &[CommentNode] {
        &self.nodes
    }

    pub fn is_expanded(&self, comment_id: &str) -> bool {
        self.expanded.contains(comment_id)
    }

    /// Load the replies of `comment_id` and show them right after it.
    /// Unknown or already expanded ids are a no-op.
    pub async fn expand(&mut self, comment_id: &str) -> Result<(), FeedError> {
        if self.is_expanded(comment_id) {
            return Ok(());
        }
        let Some(pos) = self.position(comment_id) else {
            return Ok(());
        };
        let depth = self.nodes[pos].depth;
        let subtree = self.tree.load_children(comment_id, depth).await?;

        // A loaded node whose reply is also loaded shows as expanded.
        let parents: HashSet<&str> = subtree
            .iter()
            .filter_map(|n| n.comment.parent_comment_id.as_deref())
            .collect();
        let newly_expanded: Vec<String> = subtree
            .iter()
            .filter(|n| parents.contains(n.id()))
            .map(|n| n.comment.id.clone())
            .collect();

        // The list may have changed while loading.
        let Some(pos) = self.position(comment_id) else {
            return Ok(());
        };
        let mut next = Vec::with_capacity(self.nodes.len() + subtree.len());
        next.extend_from_slice(&self.nodes[..=pos]);
        next.extend(subtree);
        next.extend_from_slice(&self.nodes[pos + 1..]);
        self.nodes = next;

        self.expanded.insert(comment_id.to_string());
        self.expanded.extend(newly_expanded);
        Ok(())
    }

    /// Hide every descendant of `comment_id`.
    pub fn collapse(&mut self, comment_id: &str) {
        if !self.expanded.remove(comment_id) {
            return;
        }
        // Parents precede their replies in the list, so one pass finds
        // every descendant.
        let mut dropped: HashSet<String> = HashSet::from([comment_id.to_string()]);
        self.nodes.retain(|node| match &node.comment.parent_comment_id {
            Some(parent) if dropped.contains(parent) => {
                dropped.insert(node.comment.id.clone());
                false
            }
            _ => true,
        });
        for id in &dropped {
            self.expanded.remove(id);
        }
    }

    /// Reflect a comment this user just posted.
    ///
    /// Roots are appended. A reply under an expanded parent is placed after
    /// the parent's existing replies; under a collapsed parent it only sets
    /// the parent's flag, so the next expand fetches it.
    pub fn apply_posted(&mut self, comment: Comment) {
        let Some(parent_id) = comment.parent_comment_id.clone() else {
            self.nodes.push(CommentNode { comment, depth: 0 });
            return;
        };
        let Some(pos) = self.position(&parent_id) else {
            return;
        };
        self.nodes[pos].comment.has_children = true;
        if !self.is_expanded(&parent_id) {
            return;
        }

        let depth = self.nodes[pos].depth + 1;
        if depth >= self.tree.max_depth() {
            return;
        }
        let end = self.nodes[pos + 1..]
            .iter()
            .position(|n| n.depth <= self.nodes[pos].depth)
            .map_or(self.nodes.len(), |offset| pos + 1 + offset);
        self.nodes.insert(end, CommentNode { comment, depth });
    }

    fn position(&self, comment_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == comment_id)
    }
}
