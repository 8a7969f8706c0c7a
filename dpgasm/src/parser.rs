use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

static BLOCK_SINGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*\[(.+)\]$").unwrap());
static BLOCK_BEGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)\s*\[(.*)$").unwrap());
static LOOP_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^subgraph\s+(\w+)\s*\[(.+)\]$").unwrap());
static LOOP_BEGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^subgraph\s+(\w+)\s*\[(.*)$").unwrap());
static EDGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\s*-->\s*(?:\|(\w+)\|\s*)?(\w+)$").unwrap());

/// Raw body of one block, before type-specific parsing.
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub body: String,
    pub line: usize,
}

/// One control-flow arrow. The condition is the `|label|`, pipes stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub cond: Option<String>,
}

#[derive(Debug, Default)]
pub struct Flowchart {
    pub blocks: IndexMap<String, SourceBlock>,
    pub edges: Vec<Edge>,
    /// Edges found inside a `subgraph ... end` body, keyed by the loop id.
    pub loop_edges: IndexMap<String, Vec<Edge>>,
}

enum State {
    Outside,
    /// Multi-line block, collecting until a line ending in `]`.
    Block { id: String, opened: usize, body: Vec<String> },
    /// Multi-line loop header, collecting until a line ending in `]`.
    LoopHeader { id: String, opened: usize, body: Vec<String> },
    /// Loop body, collecting until `end`.
    LoopBody { id: String, opened: usize, body: Vec<String> },
}

impl Flowchart {
    pub fn parse(source: &str) -> Result<Flowchart, Error> {
        let mut flow = Flowchart::default();
        let mut state = State::Outside;

        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            let lineno = idx + 1;
            if line.is_empty() || line.starts_with("%%") || line.starts_with("flowchart") {
                continue;
            }

            state = match state {
                State::Outside => flow.outside(line, lineno)?,

                State::Block { id, opened, mut body } => {
                    if let Some(rest) = line.strip_suffix(']') {
                        body.push(rest.to_string());
                        flow.insert_block(id, body, opened);
                        State::Outside
                    } else {
                        body.push(line.to_string());
                        State::Block { id, opened, body }
                    }
                }

                State::LoopHeader { id, opened, mut body } => {
                    if let Some(rest) = line.strip_suffix(']') {
                        body.push(rest.to_string());
                        State::LoopBody { id, opened, body }
                    } else {
                        body.push(line.to_string());
                        State::LoopHeader { id, opened, body }
                    }
                }

                State::LoopBody { id, opened, mut body } => {
                    if let Some(caps) = BLOCK_SINGLE.captures(line) {
                        // blocks may be declared inside the loop body
                        flow.insert_block(
                            caps[1].to_string(),
                            vec![caps[2].to_string()],
                            lineno,
                        );
                        State::LoopBody { id, opened, body }
                    } else if line.starts_with("end") {
                        flow.insert_block(id, body, opened);
                        State::Outside
                    } else if let Some(edge) = match_edge(line, lineno)? {
                        flow.loop_edges.entry(id.clone()).or_default().push(edge);
                        State::LoopBody { id, opened, body }
                    } else {
                        body.push(line.to_string());
                        State::LoopBody { id, opened, body }
                    }
                }
            };
        }

        match state {
            State::Outside => Ok(flow),
            State::Block { id, opened, .. } => Err(Error::UnterminatedBlock(id, opened)),
            State::LoopHeader { id, opened, .. } | State::LoopBody { id, opened, .. } => {
                Err(Error::UnterminatedLoop(id, opened))
            }
        }
    }

    fn outside(&mut self, line: &str, lineno: usize) -> Result<State, Error> {
        if let Some(caps) = BLOCK_SINGLE.captures(line) {
            self.insert_block(caps[1].to_string(), vec![caps[2].to_string()], lineno);
            return Ok(State::Outside);
        }
        if let Some(caps) = LOOP_SINGLE.captures(line) {
            return Ok(State::LoopBody {
                id: caps[1].to_string(),
                opened: lineno,
                body: vec![caps[2].to_string()],
            });
        }
        if !line.ends_with(']') {
            if let Some(caps) = LOOP_BEGIN.captures(line) {
                return Ok(State::LoopHeader {
                    id: caps[1].to_string(),
                    opened: lineno,
                    body: vec![caps[2].to_string()],
                });
            }
            if let Some(caps) = BLOCK_BEGIN.captures(line) {
                return Ok(State::Block {
                    id: caps[1].to_string(),
                    opened: lineno,
                    body: vec![caps[2].to_string()],
                });
            }
        }
        if let Some(edge) = match_edge(line, lineno)? {
            self.edges.push(edge);
        }
        Ok(State::Outside)
    }

    fn insert_block(&mut self, id: String, body: Vec<String>, line: usize) {
        let body = body.join("\n").trim().to_string();
        self.blocks.insert(id, SourceBlock { body, line });
    }
}

fn match_edge(line: &str, lineno: usize) -> Result<Option<Edge>, Error> {
    if let Some(caps) = EDGE.captures(line) {
        return Ok(Some(Edge {
            from: caps[1].to_string(),
            to: caps[3].to_string(),
            cond: caps.get(2).map(|m| m.as_str().to_string()),
        }));
    }
    if line.contains("-->") {
        return Err(Error::MalformedEdge(lineno, line.to_string()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_blocks_and_edges() {
        let flow = Flowchart::parse(
            "flowchart TD\n\
             %% a comment\n\
             seq1[ 10ns chan 0 ]\n\
             seq2[10ns chan 1]\n\
             seq1 --> seq2\n\
             seq2-->seq1\n",
        )
        .unwrap();
        assert_eq!(flow.blocks.len(), 2);
        assert_eq!(flow.blocks["seq1"].body, "10ns chan 0");
        assert_eq!(flow.edges.len(), 2);
        assert_eq!(flow.edges[1].from, "seq2");
        assert_eq!(flow.edges[1].cond, None);
    }

    #[test]
    fn edge_labels() {
        let flow = Flowchart::parse("trigger1 --> |success| seq2\n").unwrap();
        assert_eq!(
            flow.edges[0],
            Edge {
                from: "trigger1".into(),
                to: "seq2".into(),
                cond: Some("success".into()),
            }
        );
    }

    #[test]
    fn multi_line_block() {
        let flow = Flowchart::parse("seq1[ #pulses\n10ns chan 0\n20ns chan\n]\n").unwrap();
        assert_eq!(flow.blocks["seq1"].body, "#pulses\n10ns chan 0\n20ns chan");
    }

    #[test]
    fn loop_body_collects_inner_edges() {
        let flow = Flowchart::parse(
            "subgraph loop1[ #repeat\nivar 0 5 chan 2\n]\n\
             seq2[10ns chan 0]\n\
             seq2 --> loop_check\n\
             end\n\
             loop1 --> seq3\n",
        )
        .unwrap();
        assert_eq!(flow.blocks["loop1"].body, "#repeat\nivar 0 5 chan 2");
        assert!(flow.blocks.contains_key("seq2"));
        assert_eq!(flow.loop_edges["loop1"].len(), 1);
        assert_eq!(flow.loop_edges["loop1"][0].to, "loop_check");
        assert_eq!(flow.edges.len(), 1);
    }

    #[test]
    fn single_line_loop() {
        let flow =
            Flowchart::parse("subgraph loop1[ivar 1 10]\nseq1 --> loop_check\nend\n").unwrap();
        assert_eq!(flow.blocks["loop1"].body, "ivar 1 10");
        assert_eq!(flow.loop_edges["loop1"].len(), 1);
    }

    #[test]
    fn unterminated_block() {
        let err = Flowchart::parse("seq1[ 10ns chan 0\n20ns chan 1\n").unwrap_err();
        assert!(matches!(err, Error::UnterminatedBlock(id, 1) if id == "seq1"));

        let err = Flowchart::parse("subgraph loop1[x]\nseq1 --> loop_check\n").unwrap_err();
        assert!(matches!(err, Error::UnterminatedLoop(id, 1) if id == "loop1"));
    }

    #[test]
    fn malformed_edge() {
        let err = Flowchart::parse("seq1 --> |bad label here| seq2\n").unwrap_err();
        assert!(matches!(err, Error::MalformedEdge(1, _)));
    }
}
