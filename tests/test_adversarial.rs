//! Adversarial inputs for the ingestion path.
//!
//! Garbage headers, lying vertex counts and odd line endings must surface
//! as typed errors (or parse cleanly), never as panics or runaway
//! allocations.

use pointstream::io::{BodyLocation, ParserState};
use pointstream::{Aabb, PlyError, PlyParser, PointCloud, Settings};

fn parse(bytes: &[u8]) -> (Result<usize, PlyError>, ParserState) {
    let mut parser = PlyParser::new(&Settings::default());
    let mut points = 0;
    let result = parser
        .parse_reader(bytes, |chunk| {
            points += chunk.len();
            Ok(())
        })
        .map(|_| points);
    (result, parser.state())
}

fn binary_header(count: u64) -> Vec<u8> {
    format!(
        "ply\nformat binary_little_endian 1.0\nelement vertex {count}\n\
         property float x\nproperty float y\nproperty float z\nend_header\n"
    )
    .into_bytes()
}

// ────────────────── Headers ──────────────────

#[test]
fn empty_and_garbage_input() {
    for input in [&b""[..], b"\0\0\0\0", b"PLY\n", b"solid cube\nfacet normal 0 0 1\n"] {
        let (result, state) = parse(input);
        assert!(
            matches!(result, Err(PlyError::MalformedHeader { .. })),
            "{input:?}: {result:?}"
        );
        assert_eq!(state, ParserState::Failed);
    }
}

#[test]
fn header_without_newlines_is_bounded() {
    let mut input = b"ply\n".to_vec();
    input.extend(std::iter::repeat(b'x').take(1 << 20));
    let (result, _) = parse(&input);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("header exceeds"), "{err}");
}

#[test]
fn unsupported_format_names_the_line() {
    let (result, _) = parse(b"ply\ncomment hi\nformat binary_middle_endian 1.0\nend_header\n");
    match result {
        Err(PlyError::UnsupportedFormat { line, format }) => {
            assert_eq!(line, 3);
            assert_eq!(format, "binary_middle_endian");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn negative_and_overflowing_counts_are_rejected() {
    for count in ["-1", "18446744073709551616", "ten"] {
        let input = format!(
            "ply\nformat ascii 1.0\nelement vertex {count}\nproperty float x\n\
             property float y\nproperty float z\nend_header\n"
        );
        let (result, _) = parse(input.as_bytes());
        assert!(matches!(result, Err(PlyError::MalformedHeader { .. })), "{count}");
    }
}

#[test]
fn missing_coordinates_are_rejected() {
    let input = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n0 0\n";
    let (result, _) = parse(input);
    assert!(matches!(result, Err(PlyError::MalformedHeader { .. })));
}

// ────────────────── Bodies ──────────────────

#[test]
fn huge_declared_count_with_tiny_body() {
    let mut input = binary_header(u64::MAX / 64);
    input.extend_from_slice(&[0u8; 12 * 3 + 5]);
    let (result, state) = parse(&input);
    match result {
        Err(PlyError::TruncatedBody {
            location: BodyLocation::ByteOffset(_),
            decoded,
            ..
        }) => assert_eq!(decoded, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(state, ParserState::Failed);
}

#[test]
fn overflowing_leading_element_size() {
    let header = "ply\nformat binary_little_endian 1.0\n\
                  element face 18446744073709551615\nproperty int a\n\
                  element vertex 1\nproperty float x\nproperty float y\nproperty float z\n\
                  end_header\n";
    let mut input = header.as_bytes().to_vec();
    input.extend_from_slice(&[0u8; 12]);
    let (result, state) = parse(&input);
    match result {
        Err(PlyError::TruncatedBody {
            location: BodyLocation::ByteOffset(offset),
            decoded,
            ..
        }) => {
            assert_eq!(offset, header.len() as u64);
            assert_eq!(decoded, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(state, ParserState::Failed);
}

#[test]
fn zero_vertices_is_a_valid_empty_cloud() {
    let (result, state) = parse(&binary_header(0));
    assert_eq!(result.unwrap(), 0);
    assert_eq!(state, ParserState::Done);

    let mut cloud = PointCloud::new("empty", &Settings::default());
    assert_eq!(*cloud.finalize_bounds(), Aabb::empty());
}

#[test]
fn trailing_bytes_after_vertices_are_ignored() {
    let mut input = binary_header(1);
    input.extend_from_slice(&[0u8; 12]);
    input.extend_from_slice(b"garbage that is not part of any element");
    let (result, _) = parse(&input);
    assert_eq!(result.unwrap(), 1);
}

#[test]
fn crlf_line_endings_parse() {
    let input = b"ply\r\nformat ascii 1.0\r\nelement vertex 2\r\nproperty double x\r\n\
property double y\r\nproperty double z\r\nend_header\r\n1 2 3\r\n4 5 6\r\n";
    let (result, _) = parse(input);
    assert_eq!(result.unwrap(), 2);
}

#[test]
fn non_numeric_ascii_value_reports_line() {
    let input = b"ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\n\
property float z\nend_header\n1 2 3\n4 five 6\n";
    match parse(input).0 {
        Err(PlyError::MalformedBody { line, .. }) => assert_eq!(line, 9),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn invalid_utf8_in_ascii_body() {
    let mut input = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\n\
property float z\nend_header\n"
        .to_vec();
    input.extend_from_slice(&[0xff, 0xfe, b' ', b'1', b'\n']);
    assert!(matches!(parse(&input).0, Err(PlyError::MalformedBody { .. })));
}

#[test]
fn non_finite_coordinates_do_not_poison_bounds() {
    let input = b"ply\nformat ascii 1.0\nelement vertex 3\nproperty double x\nproperty double y\n\
property double z\nend_header\nnan 0 0\n1 1 1\ninf -2 0\n";
    let mut parser = PlyParser::new(&Settings::default());
    let summary = parser.parse_reader(&input[..], |_| Ok(())).unwrap();
    assert_eq!(summary.vertex_count, 3);
    assert!(summary.bounds.min.iter().all(|v| v.is_finite()));
    assert!(summary.bounds.contains(&[1.0, 1.0, 1.0]));
}
