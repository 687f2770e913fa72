use std::sync::LazyLock;

use regex::Regex;

use crate::types::Comment;

/// Words viewers use to call out sponsorship ("ad", "eating rice", "sponsor",
/// "paid", "promotion", "commission", "backer", "product placement").
pub const AD_KEYWORDS: &[&str] = &[
    "广告", "恰饭", "赞助", "付费", "推广", "商单", "金主", "植入",
];

/// Time expressions (`4分35`, `四分三十五`, `4:35`, `4.35`), completion words
/// ("ended", "finished", "skip") and bare numbers of three or more digits.
pub static TIME_MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[一二两三四五六七八九十零\d]+\s*[:：分.]\s*[一二两三四五六七八九十零\d]+|结束|完毕|跳过|\d{3,}",
    )
    .unwrap()
});

/// Recall-biased pre-filter for danmaku before they are sent for inference.
pub struct RelevanceFilter {
    keywords: Vec<String>,
    marker: Regex,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self {
            keywords: AD_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            marker: TIME_MARKER_REGEX.clone(),
        }
    }
}

impl RelevanceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keywords(mut self, extra: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn is_relevant(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str())) || self.marker.is_match(text)
    }

    /// Keeps relevant comments in their original order.
    pub fn filter(&self, items: &[Comment]) -> Vec<Comment> {
        items
            .iter()
            .filter(|c| self.is_relevant(&c.content))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Comment> {
        vec![
            Comment::new(3.0, "前排"),
            Comment::new(61.2, "恰饭恰饭"),
            Comment::new(62.0, "哈哈哈哈"),
            Comment::new(63.5, "谢谢你4分35狼"),
            Comment::new(64.0, "我是四分三十五郎"),
            Comment::new(70.0, "up主好帅"),
            Comment::new(80.1, "广告结束了吗"),
            Comment::new(90.0, "空降 5:20"),
            Comment::new(95.0, "跳过"),
            Comment::new(99.0, "2333"),
        ]
    }

    #[test]
    fn keeps_keywords_and_time_markers() {
        let kept = RelevanceFilter::new().filter(&sample());
        let texts: Vec<_> = kept.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "恰饭恰饭",
                "谢谢你4分35狼",
                "我是四分三十五郎",
                "广告结束了吗",
                "空降 5:20",
                "跳过",
                "2333",
            ]
        );
    }

    #[test]
    fn result_is_an_ordered_subsequence() {
        let input = sample();
        let kept = RelevanceFilter::new().filter(&input);

        let mut cursor = input.iter();
        for item in &kept {
            assert!(cursor.any(|c| c == item), "{item:?} out of order");
        }
    }

    #[test]
    fn filtering_is_idempotent() {
        let filter = RelevanceFilter::new();
        let once = filter.filter(&sample());
        assert_eq!(filter.filter(&once), once);
    }

    #[test]
    fn empty_result_when_nothing_matches() {
        let items = vec![Comment::new(1.0, "好看"), Comment::new(2.0, "awsl")];
        assert!(RelevanceFilter::new().filter(&items).is_empty());
    }

    #[test]
    fn extra_keywords_extend_recall() {
        let filter = RelevanceFilter::new().with_keywords(["sponsor"]);
        assert!(filter.is_relevant("thanks to our sponsor"));
        assert!(!RelevanceFilter::new().is_relevant("thanks to our sponsor"));
    }
}
