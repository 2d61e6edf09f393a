//! In-process canned upstream
//!
//! Serves a small, fixed data set in API-Football envelope format so the
//! whole pipeline can run without network access or quota. Used by
//! `test --mock` and by the orchestrator tests, which also inject failures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use api_client::{Endpoint, FetchRequest, RawResponse, Transport, TransportError};
use serde_json::{Value, json};

/// `(id, name, code)` of the canned national teams.
const TEAMS: &[(u64, &str, &str)] = &[
    (1, "Argentina", "ARG"),
    (2, "Brazil", "BRA"),
    (3, "France", "FRA"),
    (4, "USA", "USA"),
    (5, "Germany", "GER"),
];

/// `(team id, player id, name, position)`.
const PLAYERS: &[(u64, u64, &str, &str)] = &[
    (1, 101, "L. Messi", "Attacker"),
    (1, 102, "J. Alvarez", "Attacker"),
    (2, 201, "Vinicius Junior", "Attacker"),
    (2, 202, "Rodrygo", "Attacker"),
    (3, 301, "K. Mbappe", "Attacker"),
    (4, 401, "C. Pulisic", "Midfielder"),
    (5, 501, "J. Musiala", "Midfielder"),
];

/// Qualification league serving duplicates and a club team.
const EUROPE_QUALIFICATION: u32 = 32;

/// Scripted failure for a request.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone)]
pub enum Failure {
    Status(u16),
    Timeout,
    /// 200 with an empty `response` array
    Empty,
}

#[derive(Default)]
struct MockState {
    failures: HashMap<String, Vec<Failure>>,
    rejected_keys: Vec<String>,
    calls: Vec<(String, String)>,
    /// `requests.current` reported by the account endpoint
    requests_used: u64,
}

/// Canned API-Football upstream.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the request rendered as `request` (e.g. `players/squads?team=2`)
    /// with each of `failures` in turn before serving it normally.
    #[cfg(test)]
    pub fn fail(&self, request: &str, failures: Vec<Failure>) {
        self.lock()
            .failures
            .entry(request.to_string())
            .or_default()
            .extend(failures);
    }

    /// Answer every request made with `key` with 401.
    #[cfg(test)]
    pub fn reject_key(&self, key: &str) {
        self.lock().rejected_keys.push(key.to_string());
    }

    /// Report `used` of the 100 daily requests as spent on every key.
    #[cfg(test)]
    pub fn set_requests_used(&self, used: u64) {
        self.lock().requests_used = used;
    }

    /// `(request, key)` of every call so far.
    #[cfg(test)]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.lock().calls.clone()
    }

    /// Number of calls whose rendered request starts with `prefix`.
    #[cfg(test)]
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(r, _)| r.starts_with(prefix))
            .count()
    }

    fn respond(&self, request: &FetchRequest, api_key: &str) -> Result<RawResponse, TransportError> {
        let rendered = request.to_string();
        {
            let mut state = self.lock();
            state.calls.push((rendered.clone(), api_key.to_string()));
            if state.rejected_keys.iter().any(|k| k == api_key) {
                return Ok(RawResponse {
                    status: 401,
                    body: String::new(),
                });
            }
            let failure = state
                .failures
                .get_mut(&rendered)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0));
            match failure {
                Some(Failure::Status(status)) => {
                    return Ok(RawResponse {
                        status,
                        body: String::new(),
                    });
                }
                Some(Failure::Timeout) => {
                    return Err(TransportError::Timeout("mock timeout".into()));
                }
                Some(Failure::Empty) => {
                    return Ok(RawResponse {
                        status: 200,
                        body: envelope(request, json!([])).to_string(),
                    });
                }
                None => {}
            }
        }
        let requests_used = self.lock().requests_used;

        let param = |name: &str| -> u64 {
            request
                .params
                .get(name)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        let response = match request.endpoint {
            Endpoint::Teams => teams(param("league") as u32),
            Endpoint::Squads => squad(param("team")),
            Endpoint::Players => player(param("id"), param("season") as u32),
            Endpoint::Fixtures => fixtures(param("league") as u32, param("season") as u32),
            Endpoint::Status => account(requests_used),
        };
        Ok(RawResponse {
            status: 200,
            body: envelope(request, response).to_string(),
        })
    }
}

impl Transport for MockTransport {
    fn get<'a>(
        &'a self,
        request: &'a FetchRequest,
        api_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>> {
        let reply = self.respond(request, api_key);
        Box::pin(async move { reply })
    }
}

fn envelope(request: &FetchRequest, response: Value) -> Value {
    let results = response.as_array().map(Vec::len).unwrap_or(1);
    json!({
        "get": request.endpoint.path(),
        "parameters": request.params,
        "errors": [],
        "results": results,
        "paging": {"current": 1, "total": 1},
        "response": response,
    })
}

fn team_item(id: u64, name: &str, code: &str, national: bool) -> Value {
    json!({
        "team": {
            "id": id,
            "name": name,
            "code": code,
            "country": name,
            "founded": 1900 + id,
            "national": national,
            "logo": format!("https://media.api-sports.io/football/teams/{id}.png"),
        },
        "venue": {"name": format!("{name} Stadium"), "city": "Capital", "capacity": 50_000 + id * 1000},
    })
}

fn teams(league: u32) -> Value {
    match league {
        1 => TEAMS
            .iter()
            .map(|(id, name, code)| team_item(*id, name, code, true))
            .collect(),
        EUROPE_QUALIFICATION => json!([
            team_item(3, "France", "FRA", true),
            team_item(5, "Germany", "GER", true),
            team_item(9000, "Club Atletico", "CAT", false),
        ]),
        _ => json!([]),
    }
}

fn squad(team: u64) -> Value {
    let Some((_, name, _)) = TEAMS.iter().find(|(id, _, _)| *id == team) else {
        return json!([]);
    };
    let players: Vec<Value> = PLAYERS
        .iter()
        .filter(|(t, ..)| *t == team)
        .enumerate()
        .map(|(i, (_, id, player, position))| {
            json!({
                "id": id,
                "name": player,
                "age": 20 + (id % 15),
                "number": i + 7,
                "position": position,
                "photo": format!("https://media.api-sports.io/football/players/{id}.png"),
            })
        })
        .collect();
    json!([{"team": {"id": team, "name": name}, "players": players}])
}

fn player(id: u64, season: u32) -> Value {
    let Some((team, _, name, position)) = PLAYERS.iter().find(|(_, p, ..)| *p == id) else {
        return json!([]);
    };
    let nationality = TEAMS
        .iter()
        .find(|(t, ..)| t == team)
        .map(|(_, n, _)| *n)
        .unwrap_or_default();
    let seed = id + u64::from(season);
    let appearances = 5 + seed % 10;
    json!([{
        "player": {
            "id": id,
            "name": name,
            "firstname": name,
            "lastname": name,
            "nationality": nationality,
            "birth": {"date": "2000-01-01", "place": "Capital", "country": nationality},
            "age": 20 + (id % 15),
            "height": "180 cm",
            "weight": "75 kg",
            "injured": false,
            "photo": format!("https://media.api-sports.io/football/players/{id}.png"),
        },
        "statistics": [{
            "team": {"id": team, "name": nationality},
            "league": {"id": 1, "name": "World Cup", "country": "World", "season": season},
            "games": {
                "appearences": appearances,
                "lineups": appearances - 1,
                "minutes": appearances * 80,
                "position": position,
                "rating": format!("{:.6}", 6.5 + (seed % 20) as f64 / 10.0),
                "captain": id % 100 == 1,
            },
            "substitutes": {"in": 1, "out": 2, "bench": 0},
            "shots": {"total": seed % 12, "on": seed % 6},
            "goals": {"total": seed % 7, "conceded": 0, "assists": seed % 4, "saves": null},
            "passes": {"total": 300 + seed % 50, "key": seed % 9, "accuracy": 80},
            "tackles": {"total": seed % 5, "blocks": 0, "interceptions": 1},
            "duels": {"total": 40, "won": 20 + seed % 10},
            "dribbles": {"attempts": 10, "success": seed % 8, "past": null},
            "fouls": {"drawn": 3, "committed": 1},
            "cards": {"yellow": seed % 2, "yellowred": 0, "red": 0},
            "penalty": {"won": null, "commited": null, "scored": 0, "missed": 0, "saved": null},
        }],
    }])
}

fn fixtures(league: u32, season: u32) -> Value {
    if league != 1 || season != 2022 {
        return json!([]);
    }
    json!([
        fixture(9001, (1, "Argentina"), (3, "France"), (3, 2)),
        fixture(9002, (2, "Brazil"), (5, "Germany"), (1, 1)),
        fixture(9003, (7000, "Morocco"), (7001, "Croatia"), (0, 1)),
    ])
}

fn fixture(id: u64, home: (u64, &str), away: (u64, &str), goals: (u32, u32)) -> Value {
    json!({
        "fixture": {"id": id, "date": "2022-12-18T15:00:00+00:00", "venue": {"name": "Lusail Stadium"}},
        "league": {"id": 1, "name": "World Cup", "season": 2022, "round": "Final"},
        "teams": {
            "home": {"id": home.0, "name": home.1, "winner": goals.0 > goals.1},
            "away": {"id": away.0, "name": away.1, "winner": goals.1 > goals.0},
        },
        "goals": {"home": goals.0, "away": goals.1},
        "score": {
            "halftime": {"home": goals.0.min(1), "away": 0},
            "fulltime": {"home": goals.0, "away": goals.1},
            "extratime": {"home": null, "away": null},
            "penalty": {"home": null, "away": null},
        },
    })
}

fn account(requests_used: u64) -> Value {
    json!({
        "account": {"firstname": "Mock", "lastname": "Account", "email": "mock@example.com"},
        "subscription": {"plan": "Free", "end": "2027-01-01T00:00:00+00:00", "active": true},
        "requests": {"current": requests_used, "limit_day": 100},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::classify_response;

    async fn get(transport: &MockTransport, request: FetchRequest) -> Value {
        let raw = transport.get(&request, "mock-key-1").await.unwrap();
        assert_eq!(raw.status, 200);
        serde_json::from_str(&raw.body).unwrap()
    }

    #[tokio::test]
    async fn serves_world_cup_teams() {
        let t = MockTransport::new();
        let body = get(&t, FetchRequest::teams(1, 2022)).await;
        assert_eq!(body["results"], 5);
        assert_eq!(body["response"][3]["team"]["name"], "USA");
        assert_eq!(body["get"], "teams");
    }

    #[tokio::test]
    async fn squads_and_players_line_up() {
        let t = MockTransport::new();
        let body = get(&t, FetchRequest::squad(1)).await;
        let players = body["response"][0]["players"].as_array().unwrap();
        assert_eq!(players.len(), 2);

        let body = get(&t, FetchRequest::player_statistics(101, 2023)).await;
        assert_eq!(body["response"][0]["player"]["name"], "L. Messi");
        assert_eq!(body["response"][0]["statistics"][0]["league"]["season"], 2023);

        let body = get(&t, FetchRequest::player_statistics(999, 2023)).await;
        assert_eq!(body["results"], 0);
    }

    #[tokio::test]
    async fn injected_failures_are_served_in_order() {
        let t = MockTransport::new();
        t.fail(
            "players/squads?team=2",
            vec![Failure::Status(500), Failure::Timeout],
        );
        let request = FetchRequest::squad(2);

        let raw = t.get(&request, "k").await.unwrap();
        assert_eq!(raw.status, 500);
        assert!(t.get(&request, "k").await.is_err());
        let raw = t.get(&request, "k").await.unwrap();
        assert!(classify_response(raw.status, &raw.body).status == api_client::FetchStatus::Success);
        assert_eq!(t.count("players/squads"), 3);
    }

    #[tokio::test]
    async fn empty_failure_serves_no_rows() {
        let t = MockTransport::new();
        t.fail("players/squads?team=1", vec![Failure::Empty]);
        let body = get(&t, FetchRequest::squad(1)).await;
        assert_eq!(body["results"], 0);
        let body = get(&t, FetchRequest::squad(1)).await;
        assert_eq!(body["results"], 1);
    }

    #[tokio::test]
    async fn account_reports_requests_used() {
        let t = MockTransport::new();
        t.set_requests_used(95);
        let body = get(&t, FetchRequest::status()).await;
        assert_eq!(body["response"]["requests"]["current"], 95);
        assert_eq!(body["response"]["requests"]["limit_day"], 100);
    }

    #[tokio::test]
    async fn rejected_key_gets_401() {
        let t = MockTransport::new();
        t.reject_key("bad");
        let raw = t.get(&FetchRequest::status(), "bad").await.unwrap();
        assert_eq!(raw.status, 401);
        let raw = t.get(&FetchRequest::status(), "good").await.unwrap();
        assert_eq!(raw.status, 200);
        assert_eq!(t.calls().len(), 2);
    }
}
