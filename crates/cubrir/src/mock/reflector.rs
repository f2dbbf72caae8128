//! Reflection engine backed by the outline parser.

use crate::reflect::{FunctionInfo, Reflection, ReflectionEngine};
use crate::result::CubrirResult;

use super::parse::ScriptOutline;

/// A [`ReflectionEngine`] that parses sources with [`ScriptOutline`].
///
/// Each reflector owns its own parse state, standing in for the
/// dedicated reflection interpreter: reflecting never touches the
/// engine being debugged. The result is round-tripped through JSON so
/// the wire boundary of the real reflection routine stays exercised,
/// the way the scripted runtime serializes its messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlineReflector;

impl OutlineReflector {
    /// A reflector ready for use
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ReflectionEngine for OutlineReflector {
    fn eval_reflect(&self, source: &str, start_line: u32) -> CubrirResult<Reflection> {
        let outline = ScriptOutline::parse(source, start_line);

        let reflection = Reflection {
            functions: outline
                .functions()
                .iter()
                .map(|f| FunctionInfo {
                    name: f.name.clone(),
                    line: f.line,
                    n_params: f.n_params,
                })
                .collect(),
            branches: outline.branches().to_vec(),
            expression_lines: outline.expression_lines().to_vec(),
        };

        let encoded = serde_json::to_string(&reflection)?;
        Ok(serde_json::from_str(&encoded)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reflects_the_three_tables() {
        let reflector = OutlineReflector::new();
        let reflection = reflector
            .eval_reflect("let a = 1;\nif (a)\n    a = 2;\nfunction f(x) {\n    return x;\n}\n", 1)
            .unwrap();

        assert_eq!(reflection.expression_lines, vec![1, 2, 3, 5]);
        assert_eq!(reflection.branches.len(), 1);
        assert_eq!(reflection.branches[0].branch_point, 2);
        assert_eq!(reflection.functions.len(), 1);
        assert_eq!(reflection.functions[0].lookup_key(), "f:4:1");
    }

    #[test]
    fn reflecting_twice_is_deterministic() {
        let reflector = OutlineReflector::new();
        let source = "let a = 1;\nwhile (a)\n    a -= 1;\n";
        let first = reflector.eval_reflect(source, 1).unwrap();
        let second = reflector.eval_reflect(source, 1).unwrap();
        assert_eq!(first.expression_lines, second.expression_lines);
        assert_eq!(first.branches, second.branches);
        assert_eq!(first.functions, second.functions);
    }
}
