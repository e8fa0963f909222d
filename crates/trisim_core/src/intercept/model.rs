//! Minimal structural reader for Modelica package source.
//!
//! Interception only needs a handful of structural facts about a model
//! file: the extent of a named `model ... end ...;` block, its `connect`
//! statements, its port declarations, and the trailing annotation. These
//! are parsed by scanning for balanced delimiters instead of splicing with
//! regular expressions, so rewrites cannot tear tokens apart.

use std::ops::Range;

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Find `keyword` at `start` or later, as a standalone word.
fn find_keyword(source: &str, keyword: &str, start: usize) -> Option<usize> {
    let lower = source.to_ascii_lowercase();
    let needle = keyword.to_ascii_lowercase();
    let mut from = start;
    while let Some(rel) = lower[from..].find(&needle) {
        let pos = from + rel;
        let before_ok = pos == 0
            || !is_ident_char(source[..pos].chars().next_back().unwrap_or(' '));
        let after = pos + needle.len();
        let after_ok = after >= source.len()
            || !is_ident_char(source[after..].chars().next().unwrap_or(' '));
        if before_ok && after_ok {
            return Some(pos);
        }
        from = pos + needle.len();
    }
    None
}

/// Find `keyword` immediately followed (after whitespace) by `name`.
/// Returns the keyword position and the byte offset just past the name.
fn find_keyword_name(source: &str, keyword: &str, name: &str, start: usize) -> Option<(usize, usize)> {
    let mut from = start;
    while let Some(pos) = find_keyword(source, keyword, from) {
        let mut cursor = pos + keyword.len();
        let rest = &source[cursor..];
        let ws = rest.len() - rest.trim_start().len();
        if ws > 0 {
            cursor += ws;
            if source[cursor..].starts_with(name) {
                let after = cursor + name.len();
                let after_ok = after >= source.len()
                    || !is_ident_char(source[after..].chars().next().unwrap_or(' '));
                if after_ok {
                    return Some((pos, after));
                }
            }
        }
        from = pos + keyword.len();
    }
    None
}

/// Byte range of the `model <name> ... end <name>;` block, inclusive of the
/// terminating semicolon.
pub(crate) fn find_model_block(source: &str, name: &str) -> Option<Range<usize>> {
    let (start, mut cursor) = find_keyword_name(source, "model", name, 0)?;
    loop {
        let (_, after_name) = find_keyword_name(source, "end", name, cursor)?;
        let rest = &source[after_name..];
        let ws = rest.len() - rest.trim_start().len();
        if source[after_name + ws..].starts_with(';') {
            return Some(start..after_name + ws + 1);
        }
        cursor = after_name;
    }
}

/// Rename a model block: the first `model <from>` heading and every
/// `end <from>;` terminator.
pub(crate) fn rename_model_block(code: &str, from: &str, to: &str) -> String {
    let mut result = String::with_capacity(code.len());
    let mut rest_start = 0;

    if let Some((pos, after)) = find_keyword_name(code, "model", from, 0) {
        result.push_str(&code[..pos]);
        result.push_str("model ");
        result.push_str(to);
        rest_start = after;
    }

    let mut cursor = rest_start;
    while let Some((pos, after_name)) = find_keyword_name(code, "end", from, cursor) {
        let rest = &code[after_name..];
        let ws = rest.len() - rest.trim_start().len();
        if code[after_name + ws..].starts_with(';') {
            result.push_str(&code[cursor..pos]);
            result.push_str("end ");
            result.push_str(to);
            cursor = after_name + ws;
        } else {
            result.push_str(&code[cursor..after_name]);
            cursor = after_name;
        }
    }
    result.push_str(&code[cursor..]);
    result
}

/// Insert component declarations before the model's `equation` section, or
/// before `end <name>;` when the model has no equation section.
pub(crate) fn insert_declarations(code: &str, declarations: &str, model_name: &str) -> String {
    if let Some(pos) = find_keyword(code, "equation", 0) {
        let mut result = String::with_capacity(code.len() + declarations.len());
        result.push_str(&code[..pos]);
        result.push_str(declarations);
        result.push('\n');
        result.push_str(&code[pos..]);
        return result;
    }
    if let Some((pos, _)) = find_keyword_name(code, "end", model_name, 0) {
        let mut result = String::with_capacity(code.len() + declarations.len());
        result.push_str(&code[..pos]);
        result.push_str(declarations);
        result.push_str(&code[pos..]);
        return result;
    }
    let mut result = code.to_string();
    result.push_str(declarations);
    result
}

fn matching_paren(source: &str, open: usize) -> Option<usize> {
    debug_assert_eq!(source.as_bytes().get(open), Some(&b'('));
    let mut depth = 0usize;
    let mut quote = false;
    for (i, c) in source[open..].char_indices() {
        match c {
            '"' => quote = !quote,
            '(' if !quote => depth += 1,
            ')' if !quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrite every `connect(<instance>.<port>, X)...;` statement to route the
/// signal through an interceptor instance:
///
/// ```text
/// connect(instance.port, interceptor.physical_port);
/// connect(interceptor.final_port, X)...;
/// ```
///
/// Anything between the closing parenthesis and the semicolon (typically a
/// line annotation) stays with the second statement. Returns the rewritten
/// code and the number of rewired statements.
pub(crate) fn reroute_connections(
    code: &str,
    instance: &str,
    port: &str,
    interceptor_instance: &str,
) -> (String, usize) {
    let source_pin = format!("{instance}.{port}");
    let mut result = String::with_capacity(code.len());
    let mut cursor = 0;
    let mut rewired = 0;

    while let Some(pos) = find_keyword(code, "connect", cursor) {
        let after_kw = pos + "connect".len();
        let rest = &code[after_kw..];
        let ws = rest.len() - rest.trim_start().len();
        let open = after_kw + ws;
        if !code[open..].starts_with('(') {
            result.push_str(&code[cursor..after_kw]);
            cursor = after_kw;
            continue;
        }
        let Some(close) = matching_paren(code, open) else {
            break;
        };
        let args = &code[open + 1..close];
        let parts = crate::params::split_top_level(args, ',');
        let Some(semi) = code[close..].find(';') else {
            break;
        };
        let tail = &code[close + 1..close + semi]; // between ')' and ';'
        let stmt_end = close + semi + 1;

        if parts.len() == 2 && parts[0].trim() == source_pin {
            let target = parts[1].trim();
            result.push_str(&code[cursor..pos]);
            result.push_str(&format!(
                "connect({source_pin}, {interceptor_instance}.physical_{port});\n    \
                 connect({interceptor_instance}.final_{port}, {target}){tail};"
            ));
            rewired += 1;
        } else {
            result.push_str(&code[cursor..stmt_end]);
        }
        cursor = stmt_end;
    }
    result.push_str(&code[cursor..]);
    (result, rewired)
}

/// Collect complete input/output port declarations (declarations may span
/// multiple lines until their terminating semicolon).
pub(crate) fn port_declarations(code: &str) -> Vec<String> {
    let mut ports = Vec::new();
    let mut lines = code.lines().peekable();
    while let Some(line) = lines.next() {
        if !(line.contains("Modelica.Blocks.Interfaces.RealInput")
            || line.contains("Modelica.Blocks.Interfaces.RealOutput"))
        {
            continue;
        }
        let mut declaration = line.trim_end().to_string();
        while !declaration.trim_end().ends_with(';') {
            let Some(next) = lines.next() else { break };
            declaration.push('\n');
            declaration.push_str(next.trim_end());
        }
        ports.push(declaration);
    }
    ports
}

/// The `within <package>;` clause at the top of a model file, if present.
pub(crate) fn within_clause(code: &str) -> Option<String> {
    code.lines()
        .map(str::trim)
        .find(|line| line.starts_with("within ") && line.ends_with(';'))
        .map(str::to_string)
}

/// Name from the first `model <Name>` heading.
pub(crate) fn model_name(code: &str) -> Option<String> {
    let pos = find_keyword(code, "model", 0)?;
    let rest = code[pos + "model".len()..].trim_start();
    let name: String = rest.chars().take_while(|&c| is_ident_char(c)).collect();
    if name.is_empty() { None } else { Some(name) }
}

/// The model-level annotation block closest to the end of the code, if any.
pub(crate) fn final_annotation(code: &str) -> Option<String> {
    let mut best = None;
    let mut cursor = 0;
    while let Some(pos) = find_keyword(code, "annotation", cursor) {
        let after_kw = pos + "annotation".len();
        let rest = &code[after_kw..];
        let ws = rest.len() - rest.trim_start().len();
        let open = after_kw + ws;
        if code[open..].starts_with('(') {
            if let Some(close) = matching_paren(code, open) {
                let tail = &code[close + 1..];
                let tws = tail.len() - tail.trim_start().len();
                if code[close + 1 + tws..].starts_with(';') {
                    best = Some(code[pos..close + 2 + tws].to_string());
                    cursor = close + 1;
                    continue;
                }
            }
        }
        cursor = after_kw;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = "\
package Cycle
  model Blanket
    Modelica.Blocks.Interfaces.RealOutput to_sds[3];
  equation
    to_sds = {1, 2, 3};
  end Blanket;

  model System
    Cycle.Blanket blanket;
  equation
    connect(blanket.to_sds, sds.inflow) annotation(Line());
  end System;
end Cycle;
";

    #[test]
    fn test_find_model_block() {
        let range = find_model_block(PACKAGE, "System").unwrap();
        let block = &PACKAGE[range];
        assert!(block.starts_with("model System"));
        assert!(block.ends_with("end System;"));
        assert!(!block.contains("model Blanket"));
    }

    #[test]
    fn test_find_model_block_ignores_prefix_names() {
        // "System" must not match "model SystemX"
        let source = "model SystemX\nend SystemX;\nmodel System\nend System;";
        let range = find_model_block(source, "System").unwrap();
        assert!(source[range].starts_with("model System\n"));
    }

    #[test]
    fn test_rename_model_block() {
        let block = "model System\nequation\nend System;";
        let renamed = rename_model_block(block, "System", "System_Intercepted");
        assert_eq!(
            renamed,
            "model System_Intercepted\nequation\nend System_Intercepted;"
        );
    }

    #[test]
    fn test_reroute_connections() {
        let code = "equation\n  connect(blanket.to_sds, sds.inflow) annotation(Line());\n";
        let (rewired, count) =
            reroute_connections(code, "blanket", "to_sds", "blanket_interceptor");
        assert_eq!(count, 1);
        assert!(rewired.contains(
            "connect(blanket.to_sds, blanket_interceptor.physical_to_sds);"
        ));
        assert!(rewired.contains(
            "connect(blanket_interceptor.final_to_sds, sds.inflow) annotation(Line());"
        ));
    }

    #[test]
    fn test_reroute_leaves_other_connections_alone() {
        let code = "connect(pump.out, sds.feed);\nconnect(blanket.to_sds, sds.inflow);";
        let (rewired, count) =
            reroute_connections(code, "blanket", "to_sds", "blanket_interceptor");
        assert_eq!(count, 1);
        assert!(rewired.contains("connect(pump.out, sds.feed);"));
    }

    #[test]
    fn test_insert_declarations_before_equation() {
        let code = "model System\nequation\nend System;";
        let inserted = insert_declarations(code, "  Cycle.I x;\n", "System");
        let eq_pos = inserted.find("equation").unwrap();
        let decl_pos = inserted.find("Cycle.I x;").unwrap();
        assert!(decl_pos < eq_pos);
    }

    #[test]
    fn test_insert_declarations_without_equation_section() {
        let code = "model System\nend System;";
        let inserted = insert_declarations(code, "  Cycle.I x;\n", "System");
        assert!(inserted.find("Cycle.I x;").unwrap() < inserted.find("end System;").unwrap());
    }

    #[test]
    fn test_port_declarations_multiline() {
        let code = "model M\n  Modelica.Blocks.Interfaces.RealInput a\n    annotation();\n  Modelica.Blocks.Interfaces.RealOutput b[2];\nequation\nend M;";
        let ports = port_declarations(code);
        assert_eq!(ports.len(), 2);
        assert!(ports[0].ends_with(';'));
        assert!(ports[1].contains("b[2]"));
    }

    #[test]
    fn test_final_annotation() {
        let code = "model M\n  Real x annotation(Dialog);\nequation\n  annotation(Icon(graphics = {Rectangle()}));\nend M;";
        let annotation = final_annotation(code).unwrap();
        assert!(annotation.starts_with("annotation(Icon"));
        assert!(annotation.ends_with(';'));
    }

    #[test]
    fn test_within_and_model_name() {
        let code = "within Cycle;\nmodel Blanket\nend Blanket;";
        assert_eq!(within_clause(code), Some("within Cycle;".to_string()));
        assert_eq!(model_name(code), Some("Blanket".to_string()));
    }
}
