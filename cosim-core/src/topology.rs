/*!
Readers for the topology description files.

* the adjacency matrix: one row per line, whitespace separated `0`/`1`,
  as many rows as columns;
* the coordinates file: one node per line, `name,x,y`;
* the application connections file: a header line then one connection
  per line, ten comma separated columns, the client node in the third
  column and the server node in the fourth.

Any inconsistency is an error: a simulation must not start on a topology
that does not describe what was meant.
*/

use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of columns of a row of the application connections file
pub const CONNECTION_COLUMNS: usize = 10;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Cannot read `{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid element `{value}' in row {row} of the adjacency matrix, expecting 0 or 1")]
    InvalidElement { row: usize, value: String },
    #[error("Row {row} of the adjacency matrix has {found} elements, expecting {expected}")]
    RowLength {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("The adjacency matrix has {rows} rows and {columns} columns")]
    NotSquare { rows: usize, columns: usize },
    #[error("Line {line} of the coordinates file: {reason}")]
    InvalidCoordinates { line: usize, reason: String },
    #[error("The adjacency matrix describes {matrix} nodes but {names} nodes are named")]
    DimensionMismatch { matrix: usize, names: usize },
}

/// A square matrix, `true` where two nodes are directly linked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdjacencyMatrix(Vec<Vec<bool>>);

#[derive(Debug, Clone, PartialEq)]
pub struct NodeCoordinates {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// A declared application connection, `client` sending to `server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub client: String,
    pub server: String,
}

fn read(path: &Path) -> Result<String, TopologyError> {
    fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.to_owned(),
        source,
    })
}

impl AdjacencyMatrix {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        read(path.as_ref())?.parse()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.0
            .get(a)
            .and_then(|row| row.get(b))
            .copied()
            .unwrap_or(false)
    }

    /// every link once, from the upper triangle of the matrix
    pub fn links(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0.iter().enumerate().flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .skip(i + 1)
                .filter(|(_, linked)| **linked)
                .map(move |(j, _)| (i, j))
        })
    }
}

impl std::str::FromStr for AdjacencyMatrix {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rows = Vec::new();

        for (index, line) in s.lines().enumerate() {
            if line.trim().is_empty() {
                warn!(row = index, "blank row ends the adjacency matrix");
                break;
            }

            let row = line
                .split_whitespace()
                .map(|value| match value {
                    "0" => Ok(false),
                    "1" => Ok(true),
                    _ => Err(TopologyError::InvalidElement {
                        row: index,
                        value: value.to_owned(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(first) = rows.first().map(Vec::len)
                && first != row.len()
            {
                return Err(TopologyError::RowLength {
                    row: index,
                    found: row.len(),
                    expected: first,
                });
            }
            rows.push(row);
        }

        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if rows.len() != columns {
            return Err(TopologyError::NotSquare {
                rows: rows.len(),
                columns,
            });
        }

        debug!(nodes = rows.len(), "adjacency matrix loaded");
        Ok(Self(rows))
    }
}

/// Read the `name,x,y` lines of the coordinates file.
pub fn read_coordinates(path: impl AsRef<Path>) -> Result<Vec<NodeCoordinates>, TopologyError> {
    parse_coordinates(&read(path.as_ref())?)
}

pub fn parse_coordinates(content: &str) -> Result<Vec<NodeCoordinates>, TopologyError> {
    let mut nodes = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let invalid = |reason: &str| TopologyError::InvalidCoordinates {
            line: index + 1,
            reason: reason.to_owned(),
        };

        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        let [name, x, y, ..] = columns.as_slice() else {
            return Err(invalid("expecting `name,x,y'"));
        };
        if name.is_empty() {
            return Err(invalid("empty node name"));
        }
        let x = x.parse().map_err(|_| invalid("x is not a number"))?;
        let y = y.parse().map_err(|_| invalid("y is not a number"))?;

        nodes.push(NodeCoordinates {
            name: (*name).to_owned(),
            x,
            y,
        });
    }

    Ok(nodes)
}

/// Read the application connections, skipping the header line, short
/// rows and duplicated connections.
pub fn read_connections(path: impl AsRef<Path>) -> Result<Vec<Connection>, TopologyError> {
    Ok(parse_connections(&read(path.as_ref())?))
}

pub fn parse_connections(content: &str) -> Vec<Connection> {
    let mut connections: Vec<Connection> = Vec::new();

    for (index, line) in content.lines().enumerate().skip(1) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        if columns.len() != CONNECTION_COLUMNS {
            warn!(
                line = index + 1,
                columns = columns.len(),
                "ignoring application connection"
            );
            continue;
        }

        let connection = Connection {
            client: columns[2].to_owned(),
            server: columns[3].to_owned(),
        };
        if !connections.contains(&connection) {
            connections.push(connection);
        }
    }

    connections
}

/// Check the names of the coordinates file match the matrix dimension.
pub fn check_dimensions(
    matrix: &AdjacencyMatrix,
    nodes: &[NodeCoordinates],
) -> Result<(), TopologyError> {
    if matrix.len() != nodes.len() {
        return Err(TopologyError::DimensionMismatch {
            matrix: matrix.len(),
            names: nodes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency() {
        let matrix: AdjacencyMatrix = "0 1 0\n1 0 1\n0 1 0\n".parse().unwrap();

        assert_eq!(matrix.len(), 3);
        assert!(matrix.is_linked(1, 2));
        assert!(!matrix.is_linked(0, 2));
        assert!(!matrix.is_linked(0, 9));
        assert_eq!(matrix.links().collect::<Vec<_>>(), [(0, 1), (1, 2)]);
    }

    #[test]
    fn adjacency_stops_at_blank_line() {
        let matrix: AdjacencyMatrix = "0 1\n1 0\n\n1 1 1\n".parse().unwrap();
        assert_eq!(matrix.len(), 2);
    }

    #[test]
    fn adjacency_not_square() {
        assert!(matches!(
            "0 1 1\n1 0 1\n".parse::<AdjacencyMatrix>(),
            Err(TopologyError::NotSquare {
                rows: 2,
                columns: 3
            })
        ));
        assert!(matches!(
            "0 1\n1 0 1\n".parse::<AdjacencyMatrix>(),
            Err(TopologyError::RowLength { row: 1, .. })
        ));
        assert!(matches!(
            "0 2\n1 0\n".parse::<AdjacencyMatrix>(),
            Err(TopologyError::InvalidElement { row: 0, .. })
        ));
    }

    #[test]
    fn coordinates() {
        let nodes = parse_coordinates("H1,0,0\r\nH2, 10.5 ,-3\n\n").unwrap();

        assert_eq!(
            nodes,
            [
                NodeCoordinates {
                    name: "H1".to_owned(),
                    x: 0.0,
                    y: 0.0
                },
                NodeCoordinates {
                    name: "H2".to_owned(),
                    x: 10.5,
                    y: -3.0
                },
            ]
        );
    }

    #[test]
    fn coordinates_invalid() {
        assert!(matches!(
            parse_coordinates("H1,0\n"),
            Err(TopologyError::InvalidCoordinates { line: 1, .. })
        ));
        assert!(matches!(
            parse_coordinates("H1,0,0\nH2,north,0\n"),
            Err(TopologyError::InvalidCoordinates { line: 2, .. })
        ));
    }

    #[test]
    fn connections() {
        let content = "\
id,type,src,dst,a,b,c,d,e,f
1,sensor,H1,H2,0,0,0,0,0,0
2,sensor,H1,H2,0,0,0,0,0,0
3,short,H3,H4
4,actuator,H2,H1,0,0,0,0,0,0
";
        assert_eq!(
            parse_connections(content),
            [
                Connection {
                    client: "H1".to_owned(),
                    server: "H2".to_owned()
                },
                Connection {
                    client: "H2".to_owned(),
                    server: "H1".to_owned()
                },
            ]
        );
    }

    #[test]
    fn dimensions() {
        let matrix: AdjacencyMatrix = "0 1\n1 0\n".parse().unwrap();
        let nodes = parse_coordinates("H1,0,0\n").unwrap();

        assert!(matches!(
            check_dimensions(&matrix, &nodes),
            Err(TopologyError::DimensionMismatch { matrix: 2, names: 1 })
        ));
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            AdjacencyMatrix::read("/nonexistent/adjmat.txt"),
            Err(TopologyError::Io { .. })
        ));
    }
}
