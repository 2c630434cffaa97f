//! Stack frames and the lexical environment view collapse

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry on `P.s.stack`, top at index 0.
///
/// `#[serde(untagged)]` matches the wire shape exactly: `{"marker":true}`,
/// `{"catch":<int>}`, or `{"let": {...} | null}` — there is no explicit
/// discriminant field, so the variant is inferred from which key is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Fork boundary; error unwind stops here
    Marker {
        marker: bool,
    },
    /// `try` handler frame
    Catch {
        catch: i64,
    },
    /// Lexical binding frame (`None` = mask, hides the next non-mask frame)
    Let {
        #[serde(rename = "let")]
        bindings: Option<Map<String, Value>>,
    },
}

impl Frame {
    pub fn marker() -> Self {
        Frame::Marker { marker: true }
    }

    pub fn catch(state: i64) -> Self {
        Frame::Catch { catch: state }
    }

    pub fn let_frame(bindings: Map<String, Value>) -> Self {
        Frame::Let {
            bindings: Some(bindings),
        }
    }

    pub fn mask() -> Self {
        Frame::Let { bindings: None }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Frame::Marker { .. })
    }

    pub fn as_catch(&self) -> Option<i64> {
        match self {
            Frame::Catch { catch } => Some(*catch),
            _ => None,
        }
    }
}

/// Collapse the visible `let` frames above (and including) the stack into a
/// single environment, nearer frames shadowing farther ones.
///
/// Walks top-down: a mask frame (`let: null`) increments a skip counter; a
/// normal `let` frame only joins the view when the counter is zero,
/// otherwise it decrements the counter and is hidden. Frames below the
/// nearest `marker` (a different activation's lexical scope) are not
/// walked, since the stack is truncated at fork boundaries in practice —
/// but to be defensive we stop at the first `marker` regardless.
pub fn collapse_env(stack: &[Frame]) -> Map<String, Value> {
    let mut view: Vec<&Map<String, Value>> = Vec::new();
    let mut skip = 0u32;

    for frame in stack {
        match frame {
            Frame::Marker { .. } => break,
            Frame::Catch { .. } => {}
            Frame::Let { bindings: None } => skip += 1,
            Frame::Let {
                bindings: Some(decls),
            } => {
                if skip == 0 {
                    view.push(decls);
                } else {
                    skip -= 1;
                }
            }
        }
    }

    // Right-to-left merge: farthest frame first, nearest frame last so it
    // wins on key collision.
    let mut env = Map::new();
    for decls in view.into_iter().rev() {
        for (k, v) in decls {
            env.insert(k.clone(), v.clone());
        }
    }
    env
}

/// Write environment values back into the nearest frame (top-down) that
/// already declares each key.
pub fn write_back_env(stack: &mut [Frame], env: &Map<String, Value>) {
    let mut skip = 0u32;
    let mut remaining: Map<String, Value> = env.clone();

    for frame in stack.iter_mut() {
        if remaining.is_empty() {
            return;
        }
        match frame {
            Frame::Marker { .. } => return,
            Frame::Catch { .. } => {}
            Frame::Let { bindings: None } => skip += 1,
            Frame::Let {
                bindings: Some(decls),
            } => {
                if skip == 0 {
                    let keys: Vec<String> = decls
                        .keys()
                        .filter(|k| remaining.contains_key(*k))
                        .cloned()
                        .collect();
                    for k in keys {
                        if let Some(v) = remaining.remove(&k) {
                            decls.insert(k, v);
                        }
                    }
                } else {
                    skip -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn collapses_nearest_shadows_farthest() {
        let stack = vec![
            Frame::let_frame(obj(&[("x", json!(2))])),
            Frame::let_frame(obj(&[("x", json!(1)), ("y", json!(9))])),
        ];
        let env = collapse_env(&stack);
        assert_eq!(env.get("x"), Some(&json!(2)));
        assert_eq!(env.get("y"), Some(&json!(9)));
    }

    #[test]
    fn mask_hides_innermost_let() {
        let stack = vec![
            Frame::mask(),
            Frame::let_frame(obj(&[("x", json!(1))])),
            Frame::let_frame(obj(&[("x", json!(2))])),
        ];
        let env = collapse_env(&stack);
        assert_eq!(env.get("x"), Some(&json!(2)));
    }

    #[test]
    fn stops_at_marker() {
        let stack = vec![Frame::marker(), Frame::let_frame(obj(&[("x", json!(1))]))];
        let env = collapse_env(&stack);
        assert!(env.is_empty());
    }

    #[test]
    fn write_back_targets_nearest_declaring_frame() {
        let mut stack = vec![
            Frame::let_frame(obj(&[("y", json!(0))])),
            Frame::let_frame(obj(&[("x", json!(1))])),
        ];
        write_back_env(&mut stack, &obj(&[("x", json!(42))]));
        match &stack[1] {
            Frame::Let {
                bindings: Some(decls),
            } => assert_eq!(decls.get("x"), Some(&json!(42))),
            _ => panic!("expected let frame"),
        }
        match &stack[0] {
            Frame::Let {
                bindings: Some(decls),
            } => assert!(!decls.contains_key("x")),
            _ => panic!("expected let frame"),
        }
    }
}
