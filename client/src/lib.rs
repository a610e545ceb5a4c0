use anyhow::{bail, Context};
use foosball_core::{
    game::{MatchId, PlayerId},
    message::{
        HeadToHead, LeaderboardEntry, Match, NewMatch, Player, PlayerStats, RatingHistoryPoint,
        RecentGame, Rescore,
    },
};
use hyper::{
    body::Bytes, client::connect::HttpConnector, header, Body, Client, Method, Request,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use url::Url;

/// Client for the foosball ratings JSON API.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client<HttpConnector>,
    server_url: Url,
}

impl ApiClient {
    pub fn new(server_url: Url) -> Self {
        Self {
            client: Client::new(),
            server_url,
        }
    }

    pub async fn leaderboard(&self) -> anyhow::Result<Vec<LeaderboardEntry>> {
        self.get("leaderboard").await
    }

    pub async fn player(&self, id: PlayerId) -> anyhow::Result<Player> {
        self.get(&format!("players/{id}")).await
    }

    pub async fn create_player(&self, name: &str) -> anyhow::Result<Player> {
        let body = self
            .call(Method::POST, "players", Some(json!({ "name": name })))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn rename_player(&self, id: PlayerId, name: &str) -> anyhow::Result<()> {
        self.call(Method::PUT, &format!("players/{id}"), Some(json!({ "name": name })))
            .await?;
        Ok(())
    }

    pub async fn delete_player(&self, id: PlayerId) -> anyhow::Result<()> {
        self.call(Method::DELETE, &format!("players/{id}"), None::<()>)
            .await?;
        Ok(())
    }

    pub async fn matches(&self, limit: u32) -> anyhow::Result<Vec<Match>> {
        self.get(&format!("games?limit={limit}")).await
    }

    pub async fn create_match(&self, new: &NewMatch) -> anyhow::Result<Match> {
        let body = self.call(Method::POST, "games", Some(new)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn revise_match(&self, id: MatchId, score: Rescore) -> anyhow::Result<()> {
        self.call(Method::PUT, &format!("games/{id}"), Some(score))
            .await?;
        Ok(())
    }

    pub async fn delete_match(&self, id: MatchId) -> anyhow::Result<()> {
        self.call(Method::DELETE, &format!("games/{id}"), None::<()>)
            .await?;
        Ok(())
    }

    pub async fn player_stats(&self, id: PlayerId) -> anyhow::Result<PlayerStats> {
        self.get(&format!("players/{id}/stats")).await
    }

    pub async fn head_to_head(&self, id: PlayerId) -> anyhow::Result<Vec<HeadToHead>> {
        self.get(&format!("players/{id}/head-to-head")).await
    }

    pub async fn rating_history(&self, id: PlayerId) -> anyhow::Result<Vec<RatingHistoryPoint>> {
        self.get(&format!("players/{id}/rating-history")).await
    }

    pub async fn recent_games(&self, id: PlayerId) -> anyhow::Result<Vec<RecentGame>> {
        self.get(&format!("players/{id}/recent-games")).await
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> anyhow::Result<T> {
        let body = self.call(Method::GET, endpoint, None::<()>).await?;
        serde_json::from_slice(&body).context(format!("malformed response from {endpoint}"))
    }

    async fn call(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<impl Serialize>,
    ) -> anyhow::Result<Bytes> {
        let url = self.server_url.join(&format!("api/{endpoint}"))?;
        let request = Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header(header::CONTENT_TYPE, "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };
        tracing::debug!(%method, %url, "request");

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response).await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|mut value| match value["error"].take() {
                    Value::String(message) => Some(message),
                    _ => None,
                })
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            bail!("{method} {url}: {status}: {message}");
        }
        Ok(body)
    }
}
