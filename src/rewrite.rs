/*!
Body rewriter for container-create payloads.

Environment entries named `DOCKER_BIND_MOUNT<suffix>=<spec>` are removed from `Env`
and `<spec>` is appended, in encounter order, to `HostConfig.Binds`. Bodies without
such entries are returned untouched (same bytes, no re-serialization).
*/

use std::borrow::Cow;

use crate::errors::RewriteError;
use crate::json::Document;

/// Reserved environment name prefix that declares a bind mount.
pub const BIND_MOUNT_ENV_PREFIX: &str = "DOCKER_BIND_MOUNT";

/// Seam between the forwarding path and the rewrite algorithm.
pub trait BodyRewrite: Send + Sync {
    fn rewrite<'a>(&self, body: &'a [u8]) -> Result<Cow<'a, [u8]>, RewriteError>;
}

/// Classifies `NAME=value` environment entries.
#[derive(Debug, Clone)]
pub struct EnvTagMatcher {
    prefix: String,
}

impl Default for EnvTagMatcher {
    fn default() -> Self {
        EnvTagMatcher::new(BIND_MOUNT_ENV_PREFIX)
    }
}

impl EnvTagMatcher {
    pub fn new(prefix: &str) -> Self {
        EnvTagMatcher {
            prefix: prefix.to_string(),
        }
    }

    /// Return the bind-mount spec carried by a tagged entry, `None` for ordinary entries.
    /// The value starts after the last `=` that is not the final character, so
    /// `DOCKER_BIND_MOUNT_X=/a=b:/c` yields `b:/c`. A lone trailing `=` yields `""`.
    pub fn bind_spec<'a>(&self, entry: &'a str) -> Option<&'a str> {
        let rest = entry.strip_prefix(self.prefix.as_str())?;
        let (last, _) = rest.char_indices().next_back()?;
        match rest[..last].rfind('=') {
            Some(i) => Some(&rest[i + 1..]),
            None if rest.ends_with('=') => Some(""),
            None => None,
        }
    }
}

/// Split `env` into (ordinary entries, extracted bind specs), both in original order.
pub fn partition_env(matcher: &EnvTagMatcher, env: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut kept = Vec::with_capacity(env.len());
    let mut binds = Vec::new();
    for entry in env {
        match matcher.bind_spec(&entry) {
            Some(spec) => binds.push(spec.to_string()),
            None => kept.push(entry),
        }
    }
    (kept, binds)
}

/// The production rewriter.
#[derive(Debug, Clone, Default)]
pub struct BindMountRewriter {
    matcher: EnvTagMatcher,
}

impl BindMountRewriter {
    pub fn new(matcher: EnvTagMatcher) -> Self {
        BindMountRewriter { matcher }
    }
}

impl BodyRewrite for BindMountRewriter {
    fn rewrite<'a>(&self, body: &'a [u8]) -> Result<Cow<'a, [u8]>, RewriteError> {
        let mut root = Document::decode(body)?;

        let env = root.optional_string_list("Env")?;
        let (env, found) = partition_env(&self.matcher, env);
        if found.is_empty() {
            return Ok(Cow::Borrowed(body));
        }
        root.set_field("Env", env);

        let mut host_config = root.field_as_object("HostConfig")?;
        let mut binds = host_config.optional_string_list("Binds")?;
        binds.extend(found);
        host_config.set_field("Binds", binds);
        root.set_field("HostConfig", host_config);

        Ok(Cow::Owned(root.encode()))
    }
}

/// Convenience wrapper around the default rewriter.
pub fn rewrite_create_body(body: &[u8]) -> Result<Cow<'_, [u8]>, RewriteError> {
    BindMountRewriter::default().rewrite(body)
}
