//! Reply-tree flattening.
//!
//! Origins publish reply trees in three incompatible shapes (paginated by
//! sort type, a single page object, or a bare list). Each shape has its own
//! normalizing arm over the same accumulator, so a new upstream shape fails
//! deserialization in `plebbit-client` instead of silently yielding nothing
//! here.
//!
//! The same reply can appear under multiple sort-type pages; entries are
//! deduplicated by cid, last seen wins, order irrelevant.

use std::collections::HashMap;

use plebbit_client::{Comment, Replies};

use crate::types::Post;

/// Flatten the reply tree beneath a top-level comment into one deduplicated
/// list. Every reply is annotated with its immediate `parent_cid` and the
/// top-level ancestor's cid as `post_cid`.
pub fn flatten_replies(top_level: &Comment, subplebbit_address: &str) -> Vec<Post> {
    let mut seen: HashMap<String, Post> = HashMap::new();
    collect(
        top_level.replies.as_ref(),
        &top_level.cid,
        &top_level.cid,
        subplebbit_address,
        1,
        &mut seen,
    );
    seen.into_values().collect()
}

fn collect(
    replies: Option<&Replies>,
    parent_cid: &str,
    post_cid: &str,
    subplebbit_address: &str,
    depth: i32,
    seen: &mut HashMap<String, Post>,
) {
    let Some(replies) = replies else {
        return;
    };

    match replies {
        Replies::Paginated(set) => {
            for page in set.pages.values() {
                collect_comments(&page.comments, parent_cid, post_cid, subplebbit_address, depth, seen);
            }
        }
        Replies::Single(page) => {
            collect_comments(&page.comments, parent_cid, post_cid, subplebbit_address, depth, seen);
        }
        Replies::Flat(comments) => {
            collect_comments(comments, parent_cid, post_cid, subplebbit_address, depth, seen);
        }
    }
}

fn collect_comments(
    comments: &[Comment],
    parent_cid: &str,
    post_cid: &str,
    subplebbit_address: &str,
    depth: i32,
    seen: &mut HashMap<String, Post>,
) {
    for comment in comments {
        let post = Post::from_reply(comment, subplebbit_address, parent_cid, post_cid, depth);
        seen.insert(comment.cid.clone(), post);

        collect(
            comment.replies.as_ref(),
            &comment.cid,
            post_cid,
            subplebbit_address,
            depth + 1,
            seen,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    use plebbit_client::{Author, Page, PageSet};

    fn comment(cid: &str, replies: Option<Replies>) -> Comment {
        Comment {
            cid: cid.to_string(),
            timestamp: 1_700_000_000,
            title: None,
            content: Some(format!("body of {cid}")),
            author: Author {
                address: format!("author-of-{cid}"),
                display_name: None,
            },
            upvote_count: 0,
            downvote_count: 0,
            reply_count: 0,
            parent_cid: None,
            post_cid: None,
            depth: None,
            replies,
            extra: serde_json::Map::new(),
        }
    }

    fn top_level(cid: &str, replies: Option<Replies>) -> Comment {
        let mut c = comment(cid, replies);
        c.title = Some(format!("title of {cid}"));
        c
    }

    fn page(comments: Vec<Comment>) -> Page {
        Page {
            comments,
            next_cid: None,
        }
    }

    #[test]
    fn same_reply_under_two_sort_pages_flattens_once() {
        let mut pages = Map::new();
        pages.insert("new".to_string(), page(vec![comment("QmReply", None)]));
        pages.insert("topAll".to_string(), page(vec![comment("QmReply", None)]));

        let root = top_level(
            "QmRoot",
            Some(Replies::Paginated(PageSet {
                pages,
                page_cids: Map::new(),
            })),
        );

        let flat = flatten_replies(&root, "memes.eth");
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].cid, "QmReply");
    }

    #[test]
    fn deep_nesting_keeps_top_level_ancestor_as_post_cid() {
        // QmRoot <- QmA <- QmB <- QmC (depth 3)
        let c = comment("QmC", None);
        let b = comment("QmB", Some(Replies::Flat(vec![c])));
        let a = comment("QmA", Some(Replies::Single(page(vec![b]))));
        let root = top_level("QmRoot", Some(Replies::Flat(vec![a])));

        let flat = flatten_replies(&root, "memes.eth");
        assert_eq!(flat.len(), 3);

        let by_cid: Map<_, _> = flat.iter().map(|p| (p.cid.as_str(), p)).collect();
        for post in flat.iter() {
            assert_eq!(post.post_cid.as_deref(), Some("QmRoot"));
        }
        assert_eq!(by_cid["QmA"].parent_cid.as_deref(), Some("QmRoot"));
        assert_eq!(by_cid["QmB"].parent_cid.as_deref(), Some("QmA"));
        assert_eq!(by_cid["QmC"].parent_cid.as_deref(), Some("QmB"));
        assert_eq!(by_cid["QmC"].depth, 3);
    }

    #[test]
    fn all_three_shapes_normalize_to_the_same_list() {
        let flat_shape = top_level("QmRoot", Some(Replies::Flat(vec![comment("QmX", None)])));
        let single_shape =
            top_level("QmRoot", Some(Replies::Single(page(vec![comment("QmX", None)]))));
        let mut pages = Map::new();
        pages.insert("new".to_string(), page(vec![comment("QmX", None)]));
        let paginated_shape = top_level(
            "QmRoot",
            Some(Replies::Paginated(PageSet {
                pages,
                page_cids: Map::new(),
            })),
        );

        for root in [&flat_shape, &single_shape, &paginated_shape] {
            let flat = flatten_replies(root, "memes.eth");
            assert_eq!(flat.len(), 1);
            assert_eq!(flat[0].cid, "QmX");
            assert_eq!(flat[0].parent_cid.as_deref(), Some("QmRoot"));
            assert_eq!(flat[0].post_cid.as_deref(), Some("QmRoot"));
            assert_eq!(flat[0].depth, 1);
        }
    }

    #[test]
    fn no_replies_flattens_to_empty() {
        let root = top_level("QmRoot", None);
        assert!(flatten_replies(&root, "memes.eth").is_empty());
    }
}
