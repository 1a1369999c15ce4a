use crate::Language;

/// Starter code a fresh session is seeded with.
pub fn starter_template(language: Language) -> &'static str {
    match language {
        Language::Javascript => {
            "// JavaScript Template\n\
             console.log('Hello, World!');\n\
             \n\
             // Write your code here\n"
        }
        Language::Python => {
            "# Python Template\n\
             print('Hello, World!')\n\
             \n\
             # Write your code here\n"
        }
        Language::Java => {
            "// Java Template\n\
             public class Main {\n\
             \x20   public static void main(String[] args) {\n\
             \x20       System.out.println(\"Hello, World!\");\n\
             \n\
             \x20       // Write your code here\n\
             \x20   }\n\
             }\n"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SUPPORTED_LANGUAGES;

    #[test]
    fn test_every_language_has_a_template() {
        for language in SUPPORTED_LANGUAGES {
            let template = starter_template(language);
            assert!(!template.is_empty());
            assert!(template.contains("Hello, World!"));
        }
    }

    #[test]
    fn test_java_template_declares_main_class() {
        let template = starter_template(Language::Java);
        assert!(template.contains("public class Main"));
    }
}
