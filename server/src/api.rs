use foosball_core::{
    db::Db,
    game::{MatchId, PlayerId},
    message::{NewMatch, RatingHistoryPoint, Rescore},
    Error,
};
use futures::stream::TryStreamExt;
use hyper::{header, Body, Method, Request, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Display, str::FromStr, sync::Arc};
use url::form_urlencoded;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),
    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("encoding response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("no route for {0}")]
    NoRoute(String),
    #[error(transparent)]
    Transport(#[from] hyper::Error),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Core(Error::Validation(_)) | Self::Body(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Core(Error::NotFound(_)) | Self::NoRoute(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PlayerName {
    pub name: String,
}

/// The JSON API in front of the match ledger.
///
/// Requests share the ledger without any locking of their own; concurrent mutations are ordered
/// by the store's transactions.
#[derive(Clone, Debug)]
pub struct App {
    db: Arc<Db>,
    game_limit: u32,
    allow_origin: Option<String>,
}

impl App {
    pub fn new(db: Db, game_limit: u32, allow_origin: Option<String>) -> Self {
        Self {
            db: Arc::new(db),
            game_limit,
            allow_origin,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        tracing::info!(%method, %path, "request");

        let mut res = match self.route(req).await {
            Ok(res) => res,
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    tracing::error!(%method, %path, "{err:#}");
                } else {
                    tracing::warn!(%method, %path, %status, "{err:#}");
                }
                error_response(status, &err)
            }
        };

        if let Some(origin) = &self.allow_origin {
            if let Ok(origin) = origin.parse() {
                let headers = res.headers_mut();
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    header::HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    header::HeaderValue::from_static("Accept, Content-Type"),
                );
            }
        }
        res
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, ApiError> {
        let method = req.method().clone();
        let path = req.uri().path().trim_matches('/').to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let segments = path.split('/').collect::<Vec<_>>();
        let ["api", segments @ ..] = segments.as_slice() else {
            return Err(ApiError::NoRoute(format!("{method} /{path}")));
        };

        match (&method, segments) {
            (&Method::OPTIONS, _) => empty(StatusCode::NO_CONTENT),
            (&Method::GET, ["health"]) => respond(StatusCode::OK, &json!({"status": "ok"})),

            (&Method::GET, ["players"] | ["leaderboard"]) => {
                let board = self.db.leaderboard().await?;
                respond(StatusCode::OK, &board)
            }
            (&Method::POST, ["players"]) => {
                let PlayerName { name } = body(req).await?;
                let player = self.db.create_player(&name).await?;
                respond(StatusCode::CREATED, &player)
            }
            (&Method::GET, ["players", id]) => {
                let player = self.db.player(param(id)?).await?;
                respond(StatusCode::OK, &player)
            }
            (&Method::PUT, ["players", id]) => {
                let id: PlayerId = param(id)?;
                let PlayerName { name } = body(req).await?;
                self.db.rename_player(id, &name).await?;
                empty(StatusCode::NO_CONTENT)
            }
            (&Method::DELETE, ["players", id]) => {
                self.db.delete_player(param(id)?).await?;
                empty(StatusCode::NO_CONTENT)
            }
            (&Method::GET, ["players", id, "stats"]) => {
                let stats = self.db.player_stats(param(id)?).await?;
                respond(StatusCode::OK, &stats)
            }
            (&Method::GET, ["players", id, "head-to-head"]) => {
                let h2h = self.db.head_to_head(param(id)?).await?;
                respond(StatusCode::OK, &h2h)
            }
            (&Method::GET, ["players", id, "rating-history"]) => {
                let id = param(id)?;
                self.db.player(id).await?;
                let history: Vec<RatingHistoryPoint> =
                    self.db.rating_history(id).try_collect().await?;
                respond(StatusCode::OK, &history)
            }
            (&Method::GET, ["players", id, "recent-games"]) => {
                let games = self.db.recent_games(param(id)?).await?;
                respond(StatusCode::OK, &games)
            }

            (&Method::GET, ["games"]) => {
                let limit = form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "limit")
                    .map(|(_, limit)| param::<u32>(&limit))
                    .transpose()?
                    .map_or(self.game_limit, |limit| limit.min(self.game_limit));
                let games = self.db.matches(limit).await?;
                respond(StatusCode::OK, &games)
            }
            (&Method::POST, ["games"]) => {
                let new: NewMatch = body(req).await?;
                let game = self.db.create_match(new).await?;
                respond(StatusCode::CREATED, &game)
            }
            (&Method::GET, ["games", id]) => {
                let game = self.db.game(param(id)?).await?;
                respond(StatusCode::OK, &game)
            }
            (&Method::PUT, ["games", id]) => {
                let id: MatchId = param(id)?;
                let score: Rescore = body(req).await?;
                self.db.revise_match(id, score).await?;
                empty(StatusCode::NO_CONTENT)
            }
            (&Method::DELETE, ["games", id]) => {
                self.db.delete_match(param(id)?).await?;
                empty(StatusCode::NO_CONTENT)
            }

            _ => Err(ApiError::NoRoute(format!("{method} /{path}"))),
        }
    }
}

fn param<T>(s: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    s.parse()
        .map_err(|err| ApiError::BadRequest(format!("invalid parameter '{s}': {err}")))
}

async fn body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn respond(status: StatusCode, body: &impl Serialize) -> Result<Response<Body>, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).map_err(ApiError::Encode)?))?)
}

fn empty(status: StatusCode) -> Result<Response<Body>, ApiError> {
    Ok(Response::builder().status(status).body(Body::empty())?)
}

fn error_response(status: StatusCode, err: &ApiError) -> Response<Body> {
    let mut res = Response::new(Body::from(json!({"error": err.to_string()}).to_string()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    res
}
