use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;

use super::diff::ChangeRecord;

const BODY_TEMPLATE_NAME: &str = "change-body";

/// Values are HTML-escaped by handlebars' default escape function
const BODY_TEMPLATE: &str = concat!(
    "Changes in {{repo_name}} (<a href=\"{{repo_url}}\">{{repo_url}}</a>)<br><br>",
    "<b>{{old_commit}}</b><br>",
    "{{#each changes}}{{change_type}} - {{path}}<br>{{/each}}",
    "<b>{{new_commit}}</b>",
);

/// What gets handed to a [`Publisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    /// HTML fragment
    pub body: String,
    pub link: String,
}

/// Everything known about one detected branch change, independent of markup
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet<'a> {
    pub repo_name: &'a str,
    pub repo_url: &'a str,
    pub branch: &'a str,
    pub old_commit: &'a str,
    pub new_commit: &'a str,
    pub changes: &'a [ChangeRecord],
}

/// Receives notifications for detected changes.
///
/// Publishing is best-effort from the engine's point of view: a failure is
/// logged and the change is still considered handled.
pub trait Publisher: Send + Sync {
    fn publish(&self, payload: NotificationPayload) -> Result<()>;
}

/// Publisher that only logs, for dry runs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

impl Publisher for TracingPublisher {
    fn publish(&self, payload: NotificationPayload) -> Result<()> {
        tracing::info!(link = %payload.link, "{}", payload.title);
        tracing::debug!("{}", payload.body);
        Ok(())
    }
}

/// First 8 characters of a commit id
pub fn short_commit(commit: &str) -> &str {
    commit
        .char_indices()
        .nth(8)
        .map_or(commit, |(i, _)| &commit[..i])
}

fn renderer() -> Result<Handlebars<'static>> {
    let mut hbs = Handlebars::new();
    hbs.set_strict_mode(true);
    hbs.register_template_string(BODY_TEMPLATE_NAME, BODY_TEMPLATE)
        .context("Failed to register notification template")?;
    Ok(hbs)
}

impl ChangeSet<'_> {
    /// `<repo> (<old8> .. <new8>)`
    pub fn title(&self) -> String {
        format!(
            "{} ({} .. {})",
            self.repo_name,
            short_commit(self.old_commit),
            short_commit(self.new_commit)
        )
    }

    /// Repository header, then the old commit, one `<type> - <path>` line per
    /// change, and the new commit.
    pub fn render_html(&self) -> Result<String> {
        renderer()?
            .render(BODY_TEMPLATE_NAME, self)
            .with_context(|| format!("Failed to render notification for {}", self.repo_name))
    }

    pub fn to_payload(&self) -> Result<NotificationPayload> {
        Ok(NotificationPayload {
            title: self.title(),
            body: self.render_html()?,
            link: self.repo_url.to_string(),
        })
    }
}
