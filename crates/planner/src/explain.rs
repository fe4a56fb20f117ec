use crate::expr::fmt_expr;
use crate::operator::Operator;

/// Render an operator tree as human-readable multiline text.
pub fn explain_operator(root: &Operator) -> String {
    let mut s = String::new();
    fmt_operator(root, 0, &mut s);
    s
}

fn fmt_operator(op: &Operator, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match op {
        Operator::FragmentScan(scan) => {
            out.push_str(&format!(
                "{pad}FragmentScan fragment={} keys={} patterns={:?}\n",
                scan.fragment.id, scan.fragment.keys, scan.patterns
            ));
            if let Some(tags) = &scan.tag_filter {
                out.push_str(&format!("{pad}  tags={tags:?}\n"));
            }
        }
        Operator::Project(p) => {
            out.push_str(&format!(
                "{pad}Project patterns={:?}{}\n",
                p.patterns,
                if p.need_selected_path { " (awaiting paths)" } else { "" }
            ));
        }
        Operator::Reorder(r) => {
            out.push_str(&format!(
                "{pad}Reorder patterns={:?}{}\n",
                r.patterns,
                if r.need_selected_path { " (awaiting paths)" } else { "" }
            ));
        }
        Operator::Select(s) => {
            out.push_str(&format!("{pad}Select {}\n", fmt_expr(&s.predicate)));
        }
        Operator::Limit(l) => {
            out.push_str(&format!("{pad}Limit limit={} offset={}\n", l.limit, l.offset));
        }
        Operator::Sort(s) => {
            let keys = s
                .keys
                .iter()
                .map(|k| format!("{}{}", k.column, if k.descending { " desc" } else { "" }))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("{pad}Sort [{keys}]\n"));
        }
        Operator::Aggregate(a) => {
            out.push_str(&format!("{pad}Aggregate\n"));
            for (agg, name) in &a.aggs {
                out.push_str(&format!(
                    "{pad}  {name} := {}({})\n",
                    agg.name(),
                    fmt_expr(agg.input())
                ));
            }
        }
        Operator::Distinct(_) => out.push_str(&format!("{pad}Distinct\n")),
        Operator::AddSchemaPrefix(a) => {
            out.push_str(&format!("{pad}AddSchemaPrefix prefix={}\n", a.prefix));
        }
        Operator::ValueToSelectedPath(v) => {
            out.push_str(&format!(
                "{pad}ValueToSelectedPath column={} prefix={:?}\n",
                v.column, v.prefix
            ));
        }
        Operator::KeyJoin(_) => out.push_str(&format!("{pad}KeyJoin\n")),
        Operator::InnerJoin(j) => {
            out.push_str(&format!("{pad}InnerJoin on {} = {}\n", j.left_on, j.right_on));
        }
        Operator::Union(u) => {
            out.push_str(&format!("{pad}Union inputs={}\n", u.inputs.len()));
        }
        Operator::ProjectWaitingForPath(w) => {
            out.push_str(&format!("{pad}ProjectWaitingForPath keys={}\n", w.keys));
        }
        Operator::Folded(f) => {
            out.push_str(&format!("{pad}Folded inputs={}\n", f.inputs.len()));
            out.push_str(&format!("{pad}  template:\n"));
            fmt_operator(&f.folded_root, indent + 2, out);
        }
    }
    for child in op.children() {
        fmt_operator(child, indent + 1, out);
    }
}
