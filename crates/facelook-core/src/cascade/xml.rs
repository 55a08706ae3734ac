//! Reader for OpenCV `opencv-cascade-classifier` XML definitions.
//!
//! Supports boosted cascades with `HAAR` (upright rectangles only) or `LBP`
//! features, stumps or deeper trees.

use super::{Cascade, CascadeError, FeatureKind, Features, HaarFeature, HaarRect, LbpFeature, Node, Split, Stage, WeakClassifier};
use roxmltree::{Document, Node as XmlNode};

/// Slack subtracted from every stage threshold on load, as OpenCV does.
const STAGE_THRESHOLD_EPS: f32 = 1e-5;

fn elements<'a, 'i>(node: XmlNode<'a, 'i>) -> impl Iterator<Item = XmlNode<'a, 'i>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'i>(node: XmlNode<'a, 'i>, name: &str) -> Result<XmlNode<'a, 'i>, CascadeError> {
    elements(node)
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| CascadeError::Malformed(format!("missing <{name}> in <{}>", node.tag_name().name())))
}

fn text<'a>(node: XmlNode<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

fn child_text<'a>(node: XmlNode<'a, '_>, name: &str) -> Result<&'a str, CascadeError> {
    child(node, name).map(text)
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T, CascadeError> {
    s.parse()
        .map_err(|_| CascadeError::Malformed(format!("bad {what}: {s:?}")))
}

fn numbers<T: std::str::FromStr>(node: XmlNode<'_, '_>, what: &str) -> Result<Vec<T>, CascadeError> {
    text(node).split_whitespace().map(|s| parse_num(s, what)).collect()
}

pub(super) fn parse(xml: &str) -> Result<Cascade, CascadeError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    let cascade = if root.has_tag_name("cascade") { root } else { child(root, "cascade")? };

    let stage_type = child_text(cascade, "stageType")?;
    if stage_type != "BOOST" {
        return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
    }

    let kind = match child_text(cascade, "featureType")? {
        "HAAR" => FeatureKind::Haar,
        "LBP" => FeatureKind::Lbp,
        other => return Err(CascadeError::Unsupported(format!("feature type {other}"))),
    };

    let window_width: u32 = parse_num(child_text(cascade, "width")?, "window width")?;
    let window_height: u32 = parse_num(child_text(cascade, "height")?, "window height")?;
    if window_width < 3 || window_height < 3 {
        return Err(CascadeError::Malformed(format!(
            "window {window_width}x{window_height} too small"
        )));
    }

    let features = match kind {
        FeatureKind::Haar => Features::Haar(parse_haar_features(child(cascade, "features")?)?),
        FeatureKind::Lbp => Features::Lbp(parse_lbp_features(child(cascade, "features")?)?),
    };

    let stages = elements(child(cascade, "stages")?)
        .map(|stage| parse_stage(stage, kind))
        .collect::<Result<Vec<_>, _>>()?;
    if stages.is_empty() {
        return Err(CascadeError::Malformed("no stages".into()));
    }

    let cascade = Cascade { kind, window_width, window_height, stages, features };
    cascade.validate()?;
    Ok(cascade)
}

fn parse_stage(stage: XmlNode<'_, '_>, kind: FeatureKind) -> Result<Stage, CascadeError> {
    let threshold: f32 = parse_num(child_text(stage, "stageThreshold")?, "stage threshold")?;
    let weak = elements(child(stage, "weakClassifiers")?)
        .map(|wc| parse_weak(wc, kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage { threshold: threshold - STAGE_THRESHOLD_EPS, weak })
}

fn parse_weak(wc: XmlNode<'_, '_>, kind: FeatureKind) -> Result<WeakClassifier, CascadeError> {
    let raw: Vec<f64> = numbers(child(wc, "internalNodes")?, "internal node value")?;
    let leaves: Vec<f32> = numbers(child(wc, "leafValues")?, "leaf value")?;

    let per_node = match kind {
        FeatureKind::Haar => 4,
        FeatureKind::Lbp => 3 + 8,
    };
    if raw.is_empty() || raw.len() % per_node != 0 {
        return Err(CascadeError::Malformed(format!(
            "internalNodes has {} values, expected a multiple of {per_node}",
            raw.len()
        )));
    }

    let nodes = raw
        .chunks_exact(per_node)
        .map(|c| {
            let index = |v: f64| -> Result<i32, CascadeError> {
                if v.fract() != 0.0 {
                    return Err(CascadeError::Malformed(format!("non-integer node field {v}")));
                }
                Ok(v as i32)
            };
            let feature = index(c[2])?;
            if feature < 0 {
                return Err(CascadeError::Malformed(format!("negative feature index {feature}")));
            }
            let split = match kind {
                FeatureKind::Haar => Split::Threshold(c[3] as f32),
                FeatureKind::Lbp => {
                    let mut subset = [0u32; 8];
                    for (slot, &v) in subset.iter_mut().zip(&c[3..]) {
                        // Subset words are written as signed 32-bit integers.
                        *slot = index(v)? as u32;
                    }
                    Split::Subset(subset)
                }
            };
            Ok(Node { left: index(c[0])?, right: index(c[1])?, feature: feature as usize, split })
        })
        .collect::<Result<Vec<_>, CascadeError>>()?;

    Ok(WeakClassifier { nodes, leaves })
}

fn parse_haar_features(features: XmlNode<'_, '_>) -> Result<Vec<HaarFeature>, CascadeError> {
    elements(features)
        .map(|f| {
            if let Ok(tilted) = child_text(f, "tilted") {
                if tilted != "0" {
                    return Err(CascadeError::Unsupported("tilted Haar features".into()));
                }
            }
            let rects = elements(child(f, "rects")?)
                .map(|r| {
                    let v: Vec<f64> = numbers(r, "Haar rect")?;
                    if v.len() != 5 || v[..4].iter().any(|&n| n < 0.0) {
                        return Err(CascadeError::Malformed(format!("bad Haar rect {v:?}")));
                    }
                    Ok(HaarRect {
                        x: v[0] as u32,
                        y: v[1] as u32,
                        width: v[2] as u32,
                        height: v[3] as u32,
                        weight: v[4] as f32,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if rects.is_empty() {
                return Err(CascadeError::Malformed("Haar feature without rects".into()));
            }
            Ok(HaarFeature { rects })
        })
        .collect()
}

fn parse_lbp_features(features: XmlNode<'_, '_>) -> Result<Vec<LbpFeature>, CascadeError> {
    elements(features)
        .map(|f| {
            let v: Vec<u32> = numbers(child(f, "rect")?, "LBP rect")?;
            if v.len() != 4 {
                return Err(CascadeError::Malformed(format!("bad LBP rect {v:?}")));
            }
            Ok(LbpFeature { x: v[0], y: v[1], block_width: v[2], block_height: v[3] })
        })
        .collect()
}
