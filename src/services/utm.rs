//! UTM 参数改写
//!
//! 已存在的同名 utm_* 参数被覆盖，其他参数按原样（包括编码）保持原顺序，
//! 新参数按 source → medium → campaign → term → content 追加。

use tracing::warn;
use url::{Url, form_urlencoded};

use crate::storage::UtmParams;

pub fn apply_utm(destination: &str, utm: &UtmParams) -> String {
    let pairs = utm.pairs();
    if pairs.is_empty() {
        return destination.to_string();
    }

    let mut url = match Url::parse(destination) {
        Ok(url) => url,
        Err(e) => {
            warn!("Cannot apply UTM to {:?}: {}", destination, e);
            return destination.to_string();
        }
    };

    let appended = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();

    // 按原始片段过滤，未改写的参数不重新编码
    let mut segments: Vec<&str> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| {
            let key = form_urlencoded::parse(segment.as_bytes())
                .next()
                .map(|(key, _)| key);
            !key.is_some_and(|key| pairs.iter().any(|(k, _)| &*key == *k))
        })
        .collect();
    segments.push(&appended);

    let query = segments.join("&");
    url.set_query(Some(&query));

    url.to_string()
}
