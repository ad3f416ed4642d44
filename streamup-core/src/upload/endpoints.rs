use url::Url;

use super::error::UploadResult;

/// URL builder for the remote API.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    base: Url,
}

impl ApiEndpoints {
    pub fn parse(base_url: &str) -> UploadResult<Self> {
        let mut base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        let trimmed = base.path().trim_end_matches('/').to_string();
        base.set_path(&trimmed);
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn shortcode(&self, size: u64) -> Url {
        let mut url = self.join(&["uploads", "shortcode"]);
        url.query_pairs_mut()
            .append_pair("size", &size.to_string())
            .append_pair("version", "unknown");
        url
    }

    pub fn initialize(&self, shortcode: &str) -> Url {
        self.join(&["videos", shortcode, "initialize"])
    }

    pub fn transcode(&self, shortcode: &str) -> Url {
        self.join(&["transcode", shortcode])
    }

    pub fn cancel(&self, shortcode: &str) -> Url {
        self.join(&["videos", shortcode, "cancel"])
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
