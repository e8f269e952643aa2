//! Command handler for RESP server
//!
//! One handler per connection. Sessions opened over a connection belong to
//! it and are closed (and promoted) when the connection goes away.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tiercache::{CacheCoordinator, Session, StatsSnapshot, WriteOptions};
use tierstore::{
    format_row, parse_row, validate_identifier, Lookup, Mutation, QuerySignature, RecordStore,
    Value,
};
use tracing::{debug, warn};

use crate::resp::RespValue;

/// Coordinator type served by the daemon
pub type Coordinator = CacheCoordinator<RecordStore>;

#[derive(Serialize)]
struct NamespaceInfo {
    name: String,
    entries: usize,
    capacity: usize,
}

#[derive(Serialize)]
struct Info {
    version: &'static str,
    open_sessions: usize,
    store_rows: usize,
    namespaces: Vec<NamespaceInfo>,
    stats: StatsSnapshot,
}

pub struct CommandHandler {
    cache: Arc<Coordinator>,
    sessions: HashMap<u64, Session>,
}

impl CommandHandler {
    pub fn new(cache: Arc<Coordinator>) -> Self {
        Self {
            cache,
            sessions: HashMap::new(),
        }
    }

    pub fn handle(&mut self, cmd: RespValue) -> RespValue {
        let args = match cmd {
            RespValue::Array(Some(args)) if !args.is_empty() => args,
            _ => return RespValue::err("invalid command format"),
        };

        let command = match args[0].as_str() {
            Some(name) => name.to_uppercase(),
            None => return RespValue::err("invalid command"),
        };

        let mut words = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            match arg.as_str() {
                Some(word) => words.push(word),
                None => return RespValue::err("arguments must be UTF-8 strings"),
            }
        }

        match command.as_str() {
            "PING" => self.handle_ping(&words),
            "OPEN" => self.handle_open(&words),
            "QUERY" => self.handle_query(&words),
            "WRITE" => self.handle_write(&words),
            "COMMIT" => self.handle_commit(&words),
            "ROLLBACK" => self.handle_rollback(&words),
            "CLEAR" => self.handle_clear(&words),
            "CLOSE" => self.handle_close(&words),
            "FLUSH" => self.handle_flush(&words),
            "MAP" => self.handle_map(&words),
            "INFO" => self.handle_info(),
            "COMMAND" => RespValue::Array(Some(vec![])),
            _ => RespValue::err(format!("unknown command '{}'", command)),
        }
    }

    fn wrong_arity(name: &str) -> RespValue {
        RespValue::err(format!("wrong number of arguments for '{}' command", name))
    }

    fn session(&mut self, id: &str) -> Result<&mut Session, RespValue> {
        let id: u64 = id
            .parse()
            .map_err(|_| RespValue::err(format!("invalid session id '{}'", id)))?;
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| RespValue::err(format!("no such session {}", id)))
    }

    fn handle_ping(&self, args: &[&str]) -> RespValue {
        match args {
            [] => RespValue::SimpleString("PONG".to_string()),
            [msg] => RespValue::bulk(msg.as_bytes()),
            _ => Self::wrong_arity("ping"),
        }
    }

    fn handle_open(&mut self, args: &[&str]) -> RespValue {
        let [namespace] = args else {
            return Self::wrong_arity("open");
        };
        if let Err(e) = validate_identifier(namespace) {
            return RespValue::err(e);
        }

        let session = self.cache.open_session(namespace);
        let id = session.id();
        self.sessions.insert(id, session);
        RespValue::Integer(id as i64)
    }

    fn handle_query(&mut self, args: &[&str]) -> RespValue {
        let [sid, statement, params @ ..] = args else {
            return Self::wrong_arity("query");
        };

        let cache = Arc::clone(&self.cache);
        let session = match self.session(sid) {
            Ok(session) => session,
            Err(reply) => return reply,
        };

        let params = params.iter().map(|p| parse_param(p)).collect();
        let signature = QuerySignature::new(session.namespace(), statement, params);

        match cache.query(session, &signature) {
            Ok(Some(record)) => match format_row(signature.namespace(), true, &record) {
                Ok(line) => RespValue::bulk(line),
                Err(e) => RespValue::err(e),
            },
            Ok(None) => RespValue::nil(),
            Err(e) => RespValue::err(e),
        }
    }

    fn handle_write(&mut self, args: &[&str]) -> RespValue {
        let (sid, op, payload, flush) = match args {
            [sid, op, payload] => (sid, op, payload, None),
            [sid, op, payload, mode] => match mode.to_uppercase().as_str() {
                "FLUSH" => (sid, op, payload, Some(true)),
                "KEEP" => (sid, op, payload, Some(false)),
                _ => return RespValue::err(format!("unknown write mode '{}'", mode)),
            },
            _ => return Self::wrong_arity("write"),
        };

        let cache = Arc::clone(&self.cache);
        let session = match self.session(sid) {
            Ok(session) => session,
            Err(reply) => return reply,
        };

        let mutation = match build_mutation(session.namespace(), op, payload) {
            Ok(mutation) => mutation,
            Err(reply) => return reply,
        };

        let options = WriteOptions {
            flush_shared: flush,
        };
        match cache.write_with(session, &mutation, options) {
            Ok(affected) => RespValue::Integer(affected as i64),
            Err(e) => RespValue::err(e),
        }
    }

    fn handle_commit(&mut self, args: &[&str]) -> RespValue {
        let [sid] = args else {
            return Self::wrong_arity("commit");
        };
        let cache = Arc::clone(&self.cache);
        match self.session(sid) {
            Ok(session) => match cache.commit(session) {
                Ok(promoted) => RespValue::Integer(promoted as i64),
                Err(e) => RespValue::err(e),
            },
            Err(reply) => reply,
        }
    }

    fn handle_rollback(&mut self, args: &[&str]) -> RespValue {
        let [sid] = args else {
            return Self::wrong_arity("rollback");
        };
        let cache = Arc::clone(&self.cache);
        match self.session(sid) {
            Ok(session) => match cache.rollback(session) {
                Ok(()) => RespValue::ok(),
                Err(e) => RespValue::err(e),
            },
            Err(reply) => reply,
        }
    }

    fn handle_clear(&mut self, args: &[&str]) -> RespValue {
        let [sid] = args else {
            return Self::wrong_arity("clear");
        };
        let cache = Arc::clone(&self.cache);
        match self.session(sid) {
            Ok(session) => match cache.clear_session_cache(session) {
                Ok(()) => RespValue::ok(),
                Err(e) => RespValue::err(e),
            },
            Err(reply) => reply,
        }
    }

    fn handle_close(&mut self, args: &[&str]) -> RespValue {
        let [sid] = args else {
            return Self::wrong_arity("close");
        };
        let id = match sid.parse::<u64>() {
            Ok(id) => id,
            Err(_) => return RespValue::err(format!("invalid session id '{}'", sid)),
        };
        let Some(mut session) = self.sessions.remove(&id) else {
            return RespValue::err(format!("no such session {}", id));
        };

        match self.cache.close_session(&mut session) {
            Ok(promoted) => RespValue::Integer(promoted as i64),
            Err(e) => RespValue::err(e),
        }
    }

    fn handle_flush(&self, args: &[&str]) -> RespValue {
        let [namespace] = args else {
            return Self::wrong_arity("flush");
        };
        RespValue::Integer(self.cache.clear_namespace_cache(namespace) as i64)
    }

    fn handle_map(&self, args: &[&str]) -> RespValue {
        let lookup = match args {
            [_, _, kind] if kind.eq_ignore_ascii_case("ID") => Lookup::ById,
            [_, _, kind, field] if kind.eq_ignore_ascii_case("FIELD") => {
                Lookup::ByField(field.to_string())
            }
            [_, _, ..] => return RespValue::err("lookup must be ID or FIELD <name>"),
            _ => return Self::wrong_arity("map"),
        };
        self.cache.store().map_statement(args[0], args[1], lookup);
        RespValue::ok()
    }

    fn handle_info(&self) -> RespValue {
        let namespaces = self
            .cache
            .namespaces()
            .into_iter()
            .filter_map(|name| {
                let shared = self.cache.shared_cache(&name)?;
                Some(NamespaceInfo {
                    entries: shared.len(),
                    capacity: shared.capacity(),
                    name,
                })
            })
            .collect();

        let info = Info {
            version: env!("CARGO_PKG_VERSION"),
            open_sessions: self.sessions.len(),
            store_rows: self.cache.store().len(),
            namespaces,
            stats: self.cache.stats().snapshot(),
        };

        match serde_json::to_vec(&info) {
            Ok(json) => RespValue::bulk(json),
            Err(e) => RespValue::err(e),
        }
    }
}

impl Drop for CommandHandler {
    fn drop(&mut self) {
        for (id, mut session) in self.sessions.drain() {
            match self.cache.close_session(&mut session) {
                Ok(promoted) => debug!(session = id, promoted, "closed on disconnect"),
                Err(e) => warn!(session = id, "failed to close on disconnect: {}", e),
            }
        }
    }
}

/// Integer-looking words are `Int`, `null` is `Null`, the rest is text
fn parse_param(word: &str) -> Value {
    if word == "null" {
        return Value::Null;
    }
    match word.parse::<i64>() {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Text(word.to_string()),
    }
}

fn build_mutation(namespace: &str, op: &str, payload: &str) -> Result<Mutation, RespValue> {
    match op.to_uppercase().as_str() {
        "DELETE" => {
            let id = payload
                .parse::<i64>()
                .map_err(|_| RespValue::err(format!("invalid id '{}'", payload)))?;
            Ok(Mutation::Delete {
                namespace: namespace.to_string(),
                id,
            })
        }
        kind @ ("INSERT" | "UPDATE") => {
            let row = parse_row(payload.as_bytes()).map_err(RespValue::err)?;
            if row.namespace != namespace {
                return Err(RespValue::err(format!(
                    "row namespace '{}' does not match session namespace '{}'",
                    row.namespace, namespace
                )));
            }
            if !row.live {
                return Err(RespValue::err("tombstone rows cannot be written"));
            }
            let namespace = row.namespace;
            Ok(if kind == "INSERT" {
                Mutation::Insert {
                    namespace,
                    record: row.record,
                }
            } else {
                Mutation::Update {
                    namespace,
                    record: row.record,
                }
            })
        }
        _ => Err(RespValue::err(format!("unknown write op '{}'", op))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tiercache::CacheConfig;

    fn command(words: &[&str]) -> RespValue {
        RespValue::Array(Some(
            words.iter().map(|w| RespValue::bulk(w.as_bytes())).collect(),
        ))
    }

    fn setup() -> (TempDir, Arc<Coordinator>) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let cache = Arc::new(CacheCoordinator::new(store, CacheConfig::default()));
        (dir, cache)
    }

    fn open(handler: &mut CommandHandler, ns: &str) -> String {
        match handler.handle(command(&["OPEN", ns])) {
            RespValue::Integer(id) => id.to_string(),
            other => panic!("OPEN failed: {:?}", other),
        }
    }

    #[test]
    fn test_ping() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(cache);

        assert_eq!(
            handler.handle(command(&["PING"])),
            RespValue::SimpleString("PONG".to_string())
        );
        assert_eq!(
            handler.handle(command(&["ping", "hello"])),
            RespValue::bulk(&b"hello"[..])
        );
    }

    #[test]
    fn test_session_roundtrip() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(Arc::clone(&cache));

        assert_eq!(
            handler.handle(command(&["MAP", "emp", "getById", "ID"])),
            RespValue::ok()
        );
        let sid = open(&mut handler, "emp");

        assert_eq!(
            handler.handle(command(&[
                "WRITE",
                &sid,
                "INSERT",
                r#"emp[1]{id,name}: 1,"Alice""#
            ])),
            RespValue::Integer(1)
        );

        let row = handler.handle(command(&["QUERY", &sid, "getById", "1"]));
        assert_eq!(row, RespValue::bulk(&br#"emp[1]{id,name}: 1,"Alice""#[..]));
        assert_eq!(
            handler.handle(command(&["QUERY", &sid, "getById", "2"])),
            RespValue::nil()
        );

        assert_eq!(
            handler.handle(command(&["CLOSE", &sid])),
            RespValue::Integer(1)
        );
        assert_eq!(cache.shared_cache("emp").unwrap().len(), 1);
    }

    #[test]
    fn test_second_session_served_from_shared_tier() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(Arc::clone(&cache));
        handler.handle(command(&["MAP", "emp", "byName", "FIELD", "name"]));

        let a = open(&mut handler, "emp");
        handler.handle(command(&["WRITE", &a, "INSERT", r#"emp[1]{id,name}: 7,"Bob""#]));
        handler.handle(command(&["QUERY", &a, "byName", "Bob"]));
        handler.handle(command(&["CLOSE", &a]));

        let b = open(&mut handler, "emp");
        handler.handle(command(&["QUERY", &b, "byName", "Bob"]));

        assert_eq!(cache.stats().fetches(), 1);
        assert_eq!(cache.stats().shared_hits(), 1);
    }

    #[test]
    fn test_disconnect_promotes_open_sessions() {
        let (_dir, cache) = setup();
        cache.store().map_statement("emp", "getById", Lookup::ById);
        {
            let mut handler = CommandHandler::new(Arc::clone(&cache));
            let sid = open(&mut handler, "emp");
            handler.handle(command(&["WRITE", &sid, "INSERT", "emp[1]{id}: 1"]));
            handler.handle(command(&["QUERY", &sid, "getById", "1"]));
        }
        assert_eq!(cache.shared_cache("emp").unwrap().len(), 1);
    }

    #[test]
    fn test_write_errors() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(cache);
        let sid = open(&mut handler, "emp");
        let sid = sid.as_str();

        for words in [
            vec!["WRITE", sid, "INSERT", "dept[1]{id}: 1"],
            vec!["WRITE", sid, "INSERT", "emp[0]{id}: 1"],
            vec!["WRITE", sid, "UPSERT", "emp[1]{id}: 1"],
            vec!["WRITE", sid, "DELETE", "one"],
            vec!["WRITE", sid, "DELETE", "1", "SOMETIMES"],
            vec!["WRITE", "99", "DELETE", "1"],
        ] {
            assert!(
                matches!(handler.handle(command(&words)), RespValue::Error(_)),
                "expected error for {:?}",
                words
            );
        }
    }

    #[test]
    fn test_closed_session_is_gone() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(cache);
        let sid = open(&mut handler, "emp");

        handler.handle(command(&["CLOSE", &sid]));
        assert!(matches!(
            handler.handle(command(&["QUERY", &sid, "getById", "1"])),
            RespValue::Error(_)
        ));
        assert!(matches!(
            handler.handle(command(&["CLOSE", &sid])),
            RespValue::Error(_)
        ));
    }

    #[test]
    fn test_info_reports_json() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(cache);
        open(&mut handler, "emp");

        let reply = handler.handle(command(&["INFO"]));
        let json: serde_json::Value = match reply {
            RespValue::BulkString(Some(body)) => serde_json::from_slice(&body).unwrap(),
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(json["open_sessions"], 1);
        assert_eq!(json["namespaces"][0]["name"], "emp");
        assert_eq!(json["stats"]["fetches"], 0);
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("42"), Value::Int(42));
        assert_eq!(parse_param("-1"), Value::Int(-1));
        assert_eq!(parse_param("null"), Value::Null);
        assert_eq!(parse_param("Alice"), Value::Text("Alice".to_string()));
    }

    #[test]
    fn test_unknown_command() {
        let (_dir, cache) = setup();
        let mut handler = CommandHandler::new(cache);
        assert!(matches!(
            handler.handle(command(&["GET", "x"])),
            RespValue::Error(_)
        ));
        assert!(matches!(
            handler.handle(RespValue::Integer(1)),
            RespValue::Error(_)
        ));
    }
}
