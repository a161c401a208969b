//! An in-process mock of the remote `Kv` service, backed by a flat sorted
//! `Vec<(key, value)>` per table (duplicates at one key are adjacent
//! entries, so the usual single-value tables are just tables where every
//! key has exactly one entry). Driven entirely through
//! `kv_remote::Builder::in_mem`, so the integration tests exercise the
//! exact same wire path a real deployment would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kv_remote::testing::{
    CursorRequest, Kv, Op, Pair, VersionReply, VersionRequest,
};
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone)]
pub struct MockKv {
    tables: Arc<Mutex<HashMap<String, Vec<(Vec<u8>, Vec<u8>)>>>>,
    version: VersionReply,
}

impl MockKv {
    pub fn new(version: VersionReply) -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            version,
        }
    }

    /// Seed `table` with `rows`, sorted the way the real store would order
    /// them (by key, then by value for DupSort tables).
    pub fn seed(&self, table: &str, mut rows: Vec<(Vec<u8>, Vec<u8>)>) {
        rows.sort();
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }
}

#[tonic::async_trait]
impl Kv for MockKv {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> Result<Response<VersionReply>, Status> {
        Ok(Response::new(self.version))
    }

    type TxStream = std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<Pair, Status>> + Send + 'static>>;

    async fn tx(
        &self,
        request: Request<Streaming<CursorRequest>>,
    ) -> Result<Response<Self::TxStream>, Status> {
        let mut inbound = request.into_inner();
        let tables = self.tables.lock().unwrap().clone();

        let stream = async_stream::stream! {
            // cursor_id -> (table name, flat vector snapshot, position)
            let mut cursors: HashMap<u32, (String, Vec<(Vec<u8>, Vec<u8>)>, Option<usize>)> = HashMap::new();
            let mut next_id: u32 = 1;

            while let Some(req) = inbound.message().await.transpose() {
                let req = match req {
                    Ok(req) => req,
                    Err(status) => { yield Err(status); break; }
                };

                let op = Op::try_from(req.op).unwrap_or(Op::Close);

                match op {
                    Op::Open => {
                        let rows = tables.get(&req.bucket_name).cloned().unwrap_or_default();
                        let id = next_id;
                        next_id += 1;
                        cursors.insert(id, (req.bucket_name, rows, None));
                        yield Ok(Pair { cursor_id: id, k: None, v: None });
                    }
                    Op::Close => {
                        cursors.remove(&req.cursor_id);
                        yield Ok(Pair { cursor_id: req.cursor_id, k: None, v: None });
                    }
                    _ => {
                        let Some((_, rows, pos)) = cursors.get_mut(&req.cursor_id) else {
                            yield Err(Status::failed_precondition("no such cursor"));
                            continue;
                        };
                        let result = apply(op, rows, pos, req.k, req.v);
                        yield Ok(result);
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(stream)))
    }
}

fn pair_at(rows: &[(Vec<u8>, Vec<u8>)], idx: usize) -> Pair {
    let (k, v) = rows[idx].clone();
    Pair {
        cursor_id: 0,
        k: Some(k),
        v: Some(v),
    }
}

fn empty() -> Pair {
    Pair {
        cursor_id: 0,
        k: None,
        v: None,
    }
}

fn apply(
    op: Op,
    rows: &[(Vec<u8>, Vec<u8>)],
    pos: &mut Option<usize>,
    k: Option<Vec<u8>>,
    v: Option<Vec<u8>>,
) -> Pair {
    match op {
        Op::First => {
            if rows.is_empty() {
                *pos = None;
                empty()
            } else {
                *pos = Some(0);
                pair_at(rows, 0)
            }
        }
        Op::Last => {
            if rows.is_empty() {
                *pos = None;
                empty()
            } else {
                let idx = rows.len() - 1;
                *pos = Some(idx);
                pair_at(rows, idx)
            }
        }
        Op::Current => match *pos {
            Some(idx) if idx < rows.len() => pair_at(rows, idx),
            _ => empty(),
        },
        Op::Next => match pos.map(|i| i + 1).or(Some(0)) {
            Some(idx) if idx < rows.len() => {
                *pos = Some(idx);
                pair_at(rows, idx)
            }
            _ => {
                *pos = None;
                empty()
            }
        },
        Op::Prev => match *pos {
            Some(idx) if idx > 0 => {
                *pos = Some(idx - 1);
                pair_at(rows, idx - 1)
            }
            _ => {
                *pos = None;
                empty()
            }
        },
        Op::Seek => {
            let key = k.unwrap_or_default();
            match rows.iter().position(|(rk, _)| rk >= &key) {
                Some(idx) => {
                    *pos = Some(idx);
                    pair_at(rows, idx)
                }
                None => {
                    *pos = None;
                    empty()
                }
            }
        }
        Op::SeekExact => {
            let key = k.unwrap_or_default();
            match rows.iter().position(|(rk, _)| *rk == key) {
                Some(idx) => {
                    *pos = Some(idx);
                    pair_at(rows, idx)
                }
                None => {
                    *pos = None;
                    empty()
                }
            }
        }
        Op::NextDup => match *pos {
            Some(idx) if idx + 1 < rows.len() && rows[idx + 1].0 == rows[idx].0 => {
                *pos = Some(idx + 1);
                pair_at(rows, idx + 1)
            }
            _ => empty(),
        },
        Op::NextNoDup => match *pos {
            Some(idx) => {
                let key = &rows[idx].0;
                match rows[idx + 1..].iter().position(|(rk, _)| rk != key) {
                    Some(offset) => {
                        let new_idx = idx + 1 + offset;
                        *pos = Some(new_idx);
                        pair_at(rows, new_idx)
                    }
                    None => {
                        *pos = None;
                        empty()
                    }
                }
            }
            None => empty(),
        },
        Op::PrevDup => match *pos {
            Some(idx) if idx > 0 && rows[idx - 1].0 == rows[idx].0 => {
                *pos = Some(idx - 1);
                pair_at(rows, idx - 1)
            }
            _ => empty(),
        },
        Op::PrevNoDup => match *pos {
            Some(idx) => {
                let key = &rows[idx].0;
                let start = rows[..idx].iter().rposition(|(rk, _)| rk != key);
                match start {
                    Some(new_idx) => {
                        *pos = Some(new_idx);
                        pair_at(rows, new_idx)
                    }
                    None => {
                        *pos = None;
                        empty()
                    }
                }
            }
            None => empty(),
        },
        Op::FirstDup => match *pos {
            Some(idx) => {
                let key = rows[idx].0.clone();
                let start = rows[..=idx].iter().rposition(|(rk, _)| *rk != key).map(|i| i + 1).unwrap_or(0);
                *pos = Some(start);
                pair_at(rows, start)
            }
            None => empty(),
        },
        Op::LastDup => match *pos {
            Some(idx) => {
                let key = rows[idx].0.clone();
                let end = rows[idx..].iter().position(|(rk, _)| *rk != key).map(|o| idx + o - 1).unwrap_or(rows.len() - 1);
                *pos = Some(end);
                pair_at(rows, end)
            }
            None => empty(),
        },
        Op::SeekBoth => {
            let key = k.unwrap_or_default();
            let value = v.unwrap_or_default();
            match rows
                .iter()
                .position(|(rk, rv)| *rk == key && *rv >= value)
            {
                Some(idx) => {
                    *pos = Some(idx);
                    let (_, v) = rows[idx].clone();
                    Pair {
                        cursor_id: 0,
                        k: None,
                        v: Some(v),
                    }
                }
                None => empty(),
            }
        }
        Op::SeekBothExact => {
            let key = k.unwrap_or_default();
            let value = v.unwrap_or_default();
            match rows
                .iter()
                .position(|(rk, rv)| *rk == key && *rv == value)
            {
                Some(idx) => {
                    *pos = Some(idx);
                    pair_at(rows, idx)
                }
                None => {
                    *pos = None;
                    empty()
                }
            }
        }
        Op::Open | Op::Close => unreachable!("handled by the caller"),
    }
}
