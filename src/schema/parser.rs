//! Statement parser for schema sources
//!
//! Turns the token stream of one source into top level statements. Cross
//! statement checks (duplicate names, parents, imports) happen in the
//! compiler once every source has been parsed.

use super::lexer::{Token, TokenKind};
use super::{ImportDecl, ImportedSymbol, SchemaError, SchemaResult};

/// A top level schema statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `import a.b;` or `from a.b import *;`
    ModuleImport { module_path: String, line: usize },
    /// `from a.b import X/AI, Y;`
    SymbolImport(ImportDecl),
    /// `dclass Name : Parent { ... };`
    Class {
        name: String,
        parents: Vec<String>,
        fields: Vec<String>,
        line: usize,
    },
    /// `struct Name { ... };`
    Struct {
        name: String,
        fields: Vec<String>,
        line: usize,
    },
    /// `keyword name;`
    Keyword { name: String },
    /// `typedef ...;`
    Typedef,
}

struct Parser<'a> {
    origin: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

/// Parse the tokens of one schema source
pub fn parse(origin: &str, tokens: &[Token]) -> SchemaResult<Vec<Statement>> {
    let mut parser = Parser {
        origin,
        tokens,
        pos: 0,
    };
    let mut statements = Vec::new();

    while let Some(token) = parser.peek() {
        if token.is_punct(';') {
            parser.pos += 1;
            continue;
        }
        statements.push(parser.statement()?);
    }

    Ok(statements)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> SchemaResult<&'a Token> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                self.pos += 1;
                Ok(token)
            }
            None => Err(SchemaError::UnexpectedEof {
                origin: self.origin.to_string(),
                expected,
            }),
        }
    }

    fn unexpected(&self, token: &Token, expected: &'static str) -> SchemaError {
        SchemaError::UnexpectedToken {
            origin: self.origin.to_string(),
            line: token.line,
            expected,
            found: token.describe(),
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        match self.peek() {
            Some(token) if token.is_punct(c) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> SchemaResult<()> {
        let token = self.next(expected)?;
        if token.is_punct(c) {
            Ok(())
        } else {
            Err(self.unexpected(token, expected))
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> SchemaResult<String> {
        let token = self.next(expected)?;
        match token.ident() {
            Some(word) => Ok(word.to_string()),
            None => Err(self.unexpected(token, expected)),
        }
    }

    fn dotted_path(&mut self) -> SchemaResult<String> {
        let mut path = self.expect_ident("module path")?;
        while self.eat_punct('.') {
            path.push('.');
            path.push_str(&self.expect_ident("module path component")?);
        }
        Ok(path)
    }

    fn statement(&mut self) -> SchemaResult<Statement> {
        let token = self.next("statement")?;
        let keyword = match token.ident() {
            Some(word) => word,
            None => return Err(self.unexpected(token, "statement keyword")),
        };

        match keyword {
            "from" => self.symbol_import(token.line),
            "import" => {
                let module_path = self.dotted_path()?;
                self.eat_punct(';');
                Ok(Statement::ModuleImport {
                    module_path,
                    line: token.line,
                })
            }
            "dclass" => {
                let name = self.expect_ident("class name")?;
                let mut parents = Vec::new();
                if self.eat_punct(':') {
                    parents.push(self.expect_ident("parent class name")?);
                    while self.eat_punct(',') {
                        parents.push(self.expect_ident("parent class name")?);
                    }
                }
                let fields = self.block()?;
                Ok(Statement::Class {
                    name,
                    parents,
                    fields,
                    line: token.line,
                })
            }
            "struct" => {
                let name = self.expect_ident("struct name")?;
                let fields = self.block()?;
                Ok(Statement::Struct {
                    name,
                    fields,
                    line: token.line,
                })
            }
            "keyword" => {
                let name = self.expect_ident("keyword name")?;
                self.eat_punct(';');
                Ok(Statement::Keyword { name })
            }
            "typedef" => {
                loop {
                    if self.next("';' ending typedef")?.is_punct(';') {
                        break;
                    }
                }
                Ok(Statement::Typedef)
            }
            _ => Err(self.unexpected(token, "'from', 'import', 'dclass', 'struct', 'keyword' or 'typedef'")),
        }
    }

    fn symbol_import(&mut self, line: usize) -> SchemaResult<Statement> {
        let module_path = self.dotted_path()?;
        let token = self.next("'import'")?;
        if !token.is_ident("import") {
            return Err(self.unexpected(token, "'import'"));
        }

        if self.eat_punct('*') {
            self.eat_punct(';');
            return Ok(Statement::ModuleImport { module_path, line });
        }

        let mut symbols = vec![self.imported_symbol()?];
        while self.eat_punct(',') {
            symbols.push(self.imported_symbol()?);
        }
        self.eat_punct(';');

        Ok(Statement::SymbolImport(ImportDecl {
            module_path,
            symbols,
            line,
        }))
    }

    fn imported_symbol(&mut self) -> SchemaResult<ImportedSymbol> {
        let name = self.expect_ident("imported class name")?;
        let mut suffixes = Vec::new();
        while self.eat_punct('/') {
            suffixes.push(self.expect_ident("import suffix")?);
        }
        Ok(ImportedSymbol { name, suffixes })
    }

    /// Parses `{ field; ... }` with an optional trailing `;`, returning field names
    fn block(&mut self) -> SchemaResult<Vec<String>> {
        self.expect_punct('{', "'{'")?;
        let mut fields = Vec::new();

        loop {
            let start = self.pos;
            let mut depth = 0usize;

            let end = loop {
                let token = self.next("'}'")?;
                match token.kind {
                    TokenKind::Punct('(') | TokenKind::Punct('[') => depth += 1,
                    TokenKind::Punct(')') | TokenKind::Punct(']') => {
                        depth = depth.saturating_sub(1);
                    }
                    TokenKind::Punct(';') if depth == 0 => break self.pos - 1,
                    TokenKind::Punct('}') if depth == 0 => {
                        if self.pos - 1 != start {
                            return Err(self.unexpected(token, "';' ending field"));
                        }
                        self.eat_punct(';');
                        return Ok(fields);
                    }
                    _ => {}
                }
            };

            let statement = &self.tokens[start..end];
            if statement.is_empty() {
                continue;
            }
            match field_name(statement) {
                Some(name) => fields.push(name.to_string()),
                None => {
                    return Err(SchemaError::MissingFieldName {
                        origin: self.origin.to_string(),
                        line: statement[0].line,
                    });
                }
            }
        }
    }
}

/// Picks the declared name out of one field statement
///
/// `setPos(int16, int16) ram;` -> `setPos`, `setXY : setX, setY;` -> `setXY`,
/// `uint8 count = 3;` -> `count`, `string name;` -> `name`.
fn field_name(statement: &[Token]) -> Option<&str> {
    for marker in ['(', ':', '='] {
        if let Some(k) = statement.iter().position(|t| t.is_punct(marker)) {
            return k.checked_sub(1).and_then(|i| statement[i].ident());
        }
    }
    statement.iter().rev().find_map(|t| t.ident())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::lexer::tokenize;

    fn parse_str(source: &str) -> SchemaResult<Vec<Statement>> {
        let tokens = tokenize("test.dc", source)?;
        parse("test.dc", &tokens)
    }

    #[test]
    fn test_symbol_import() {
        let statements =
            parse_str("from toontown.coghq import DistributedLift/AI, LobbyManager/AI/UD\n")
                .unwrap();
        match &statements[0] {
            Statement::SymbolImport(decl) => {
                assert_eq!(decl.module_path, "toontown.coghq");
                assert_eq!(decl.symbols.len(), 2);
                assert_eq!(decl.symbols[1].name, "LobbyManager");
                assert_eq!(decl.symbols[1].suffixes, vec!["AI", "UD"]);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_imports_without_semicolons() {
        let statements = parse_str("import otp.ai\nfrom a import B\nfrom c.d import E;").unwrap();
        assert_eq!(statements.len(), 3);
        assert!(matches!(&statements[0], Statement::ModuleImport { module_path, .. } if module_path == "otp.ai"));
    }

    #[test]
    fn test_wildcard_import() {
        let statements =
            parse_str("from toontown.pets.PetDCImports import *\nfrom a import B").unwrap();
        assert_eq!(statements.len(), 2);
        match &statements[0] {
            Statement::ModuleImport { module_path, line } => {
                assert_eq!(module_path, "toontown.pets.PetDCImports");
                assert_eq!(*line, 1);
            }
            other => panic!("unexpected statement: {:?}", other),
        }

        assert!(parse_str("from a import *, B").is_err());
    }

    #[test]
    fn test_class_fields() {
        let statements = parse_str(
            "dclass DistributedAvatar : DistributedNode, Other {\n\
               setName(string = \"x;y\") required broadcast;\n\
               setXY : setX, setY;\n\
               uint8 count = 3;\n\
             };",
        )
        .unwrap();
        match &statements[0] {
            Statement::Class { name, parents, fields, line } => {
                assert_eq!(name, "DistributedAvatar");
                assert_eq!(parents, &vec!["DistributedNode".to_string(), "Other".to_string()]);
                assert_eq!(fields, &vec!["setName", "setXY", "count"]);
                assert_eq!(*line, 1);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_struct_and_keyword_and_typedef() {
        let statements =
            parse_str("keyword ram;\ntypedef uint8 bool;\nstruct Buff { uint8 kind; int16 amount; }")
                .unwrap();
        assert_eq!(statements.len(), 3);
        assert!(matches!(&statements[2], Statement::Struct { fields, .. } if fields.len() == 2));
    }

    #[test]
    fn test_missing_semicolon_in_block() {
        let err = parse_str("dclass A {\n setX(int16) ram\n}").unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedToken { line: 3, .. }));
    }

    #[test]
    fn test_unknown_statement() {
        let err = parse_str("class A {}").unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedToken { line: 1, .. }));
    }

    #[test]
    fn test_eof_inside_class() {
        let err = parse_str("dclass A { setX(int16);").unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedEof { .. }));
    }
}
